use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{ChargeMethod, ChargeRequest, GatewayError, GatewayPayment, PaymentGateway};

const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Mercado Pago `/v1/payments` adapter.
#[derive(Clone)]
pub struct MercadoPagoGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MercadoPagoGateway {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    async fn read_payment(response: reqwest::Response) -> Result<GatewayPayment, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: PaymentResponse = response.json().await?;
        payload.try_into()
    }
}

#[derive(Debug, Serialize)]
struct Identification<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    number: &'a str,
}

#[derive(Debug, Serialize)]
struct PayerBody<'a> {
    email: &'a str,
    first_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identification: Option<Identification<'a>>,
}

#[derive(Debug, Serialize)]
struct PaymentBody<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    description: &'a str,
    payment_method_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    installments: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    payer: PayerBody<'a>,
    external_reference: &'a str,
    notification_url: &'a str,
}

impl<'a> From<&'a ChargeRequest> for PaymentBody<'a> {
    fn from(request: &'a ChargeRequest) -> Self {
        let (payment_method_id, installments, token) = match &request.method {
            ChargeMethod::Pix => ("pix", None, None),
            ChargeMethod::Card {
                brand,
                token,
                installments,
            } => (brand.as_str(), Some(*installments), Some(token.as_str())),
        };

        PaymentBody {
            transaction_amount: request.amount,
            description: &request.description,
            payment_method_id,
            installments,
            token,
            payer: PayerBody {
                email: &request.payer.email,
                first_name: &request.payer.first_name,
                identification: request.payer.document.as_deref().map(|number| Identification {
                    kind: "CPF",
                    number,
                }),
            },
            external_reference: &request.external_reference,
            notification_url: &request.notification_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
    ticket_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: Value,
    status: Option<String>,
    status_detail: Option<String>,
    point_of_interaction: Option<PointOfInteraction>,
}

impl TryFrom<PaymentResponse> for GatewayPayment {
    type Error = GatewayError;

    fn try_from(response: PaymentResponse) -> Result<Self, Self::Error> {
        // Mercado Pago sends numeric ids; accept strings too.
        let id = match response.id {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s,
            other => return Err(GatewayError::Decode(format!("payment id {other}"))),
        };
        let status = response
            .status
            .ok_or_else(|| GatewayError::Decode(format!("payment {id} has no status")))?;
        let data = response
            .point_of_interaction
            .and_then(|poi| poi.transaction_data);

        let (qr_code, qr_code_base64, ticket_url) = match data {
            Some(d) => (d.qr_code, d.qr_code_base64, d.ticket_url),
            None => (None, None, None),
        };

        Ok(GatewayPayment {
            id,
            status,
            status_detail: response.status_detail,
            qr_code,
            qr_code_base64,
            ticket_url,
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_payment(&self, request: &ChargeRequest) -> Result<GatewayPayment, GatewayError> {
        let url = format!("{}/v1/payments", self.base_url);
        debug!(external_reference = %request.external_reference, "Creating gateway payment");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&PaymentBody::from(request))
            .send()
            .await?;

        Self::read_payment(response).await
    }

    async fn get_payment(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        let url = format!("{}/v1/payments/{}", self.base_url, external_id);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .send()
            .await?;

        Self::read_payment(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Payer;
    use serde_json::json;

    fn card_request() -> ChargeRequest {
        ChargeRequest {
            idempotency_key: "attempt-1".to_string(),
            amount: Decimal::new(25050, 2),
            description: "Excursão: Ilha Grande".to_string(),
            method: ChargeMethod::Card {
                brand: "visa".to_string(),
                token: "tok_123".to_string(),
                installments: 3,
            },
            payer: Payer {
                email: "ana@example.com".to_string(),
                first_name: "Ana".to_string(),
                document: Some("12345678909".to_string()),
            },
            external_reference: "3f1c".to_string(),
            notification_url: "https://tour.example/webhook/mercadopago".to_string(),
        }
    }

    #[test]
    fn test_card_body_matches_wire_format() {
        let request = card_request();
        let body = serde_json::to_value(PaymentBody::from(&request)).unwrap();

        assert_eq!(body["transaction_amount"], json!(250.5));
        assert_eq!(body["payment_method_id"], "visa");
        assert_eq!(body["installments"], 3);
        assert_eq!(body["token"], "tok_123");
        assert_eq!(body["payer"]["identification"]["type"], "CPF");
        assert_eq!(body["external_reference"], "3f1c");
    }

    #[test]
    fn test_pix_body_omits_card_fields() {
        let mut request = card_request();
        request.method = ChargeMethod::Pix;
        request.payer.document = None;
        let body = serde_json::to_value(PaymentBody::from(&request)).unwrap();

        assert_eq!(body["payment_method_id"], "pix");
        assert!(body.get("installments").is_none());
        assert!(body.get("token").is_none());
        assert!(body["payer"].get("identification").is_none());
    }

    #[test]
    fn test_pix_response_carries_qr_artifacts() {
        let response: PaymentResponse = serde_json::from_value(json!({
            "id": 1325439871u64,
            "status": "pending",
            "status_detail": "pending_waiting_transfer",
            "point_of_interaction": {
                "transaction_data": {
                    "qr_code": "00020126580014br.gov.bcb.pix",
                    "qr_code_base64": "iVBORw0KGgo=",
                    "ticket_url": "https://www.mercadopago.com.br/payments/1325439871/ticket"
                }
            }
        }))
        .unwrap();

        let payment = GatewayPayment::try_from(response).unwrap();
        assert_eq!(payment.id, "1325439871");
        assert_eq!(payment.status, "pending");
        assert_eq!(payment.qr_code.as_deref(), Some("00020126580014br.gov.bcb.pix"));
    }

    #[test]
    fn test_response_without_status_is_rejected() {
        let response: PaymentResponse =
            serde_json::from_value(json!({ "id": 42 })).unwrap();
        assert!(matches!(
            GatewayPayment::try_from(response),
            Err(GatewayError::Decode(_))
        ));
    }
}
