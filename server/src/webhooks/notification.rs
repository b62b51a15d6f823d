use serde_json::Value;
use std::collections::HashMap;

/// Pulls the gateway payment id out of a notification body.
///
/// Accepts `{"type": "payment", "data": {"id": ...}}` with a numeric or string
/// id, and the older `{"topic": "payment", "resource": "<id or url>"}` shape.
/// Other event types yield `None`.
pub fn extract_payment_id(body: &Value) -> Option<String> {
    let kind = body
        .get("type")
        .or_else(|| body.get("topic"))
        .and_then(Value::as_str)?;
    if kind != "payment" {
        return None;
    }

    if let Some(id) = body.pointer("/data/id").and_then(id_text) {
        return Some(id);
    }

    body.get("resource")
        .and_then(Value::as_str)
        .and_then(|resource| resource.rsplit('/').next())
        .and_then(non_empty)
}

/// Same as [`extract_payment_id`] for notifications carried in the query string
/// (`?type=payment&data.id=123` or `?topic=payment&id=123`).
pub fn extract_payment_id_from_query(params: &HashMap<String, String>) -> Option<String> {
    let kind = params.get("type").or_else(|| params.get("topic"))?;
    if kind != "payment" {
        return None;
    }

    params
        .get("data.id")
        .or_else(|| params.get("id"))
        .and_then(|id| non_empty(id))
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => non_empty(s),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_and_string_ids() {
        let numeric = json!({ "type": "payment", "action": "payment.updated", "data": { "id": 1325439871u64 } });
        let text = json!({ "type": "payment", "data": { "id": "1325439871" } });

        assert_eq!(extract_payment_id(&numeric).as_deref(), Some("1325439871"));
        assert_eq!(extract_payment_id(&text).as_deref(), Some("1325439871"));
    }

    #[test]
    fn test_topic_resource_shape() {
        let body = json!({ "topic": "payment", "resource": "https://api.mercadopago.com/v1/payments/42" });
        assert_eq!(extract_payment_id(&body).as_deref(), Some("42"));
    }

    #[test]
    fn test_other_events_are_ignored() {
        assert_eq!(extract_payment_id(&json!({ "type": "merchant_order", "data": { "id": 7 } })), None);
        assert_eq!(extract_payment_id(&json!({ "data": { "id": 7 } })), None);
        assert_eq!(extract_payment_id(&json!({ "type": "payment", "data": { "id": "" } })), None);
        assert_eq!(extract_payment_id(&json!("garbage")), None);
    }

    #[test]
    fn test_query_string_notifications() {
        let mut params = HashMap::new();
        params.insert("type".to_string(), "payment".to_string());
        params.insert("data.id".to_string(), "77".to_string());
        assert_eq!(extract_payment_id_from_query(&params).as_deref(), Some("77"));

        let mut legacy = HashMap::new();
        legacy.insert("topic".to_string(), "payment".to_string());
        legacy.insert("id".to_string(), "78".to_string());
        assert_eq!(extract_payment_id_from_query(&legacy).as_deref(), Some("78"));

        assert_eq!(extract_payment_id_from_query(&HashMap::new()), None);
    }
}
