use tiny_http::Request;

pub fn authorization_headers(req: &Request) -> Vec<String> {
    req.headers()
        .iter()
        .filter(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string())
        .collect()
}

/// Bearer-token check for the telemetry and health endpoints.
/// With no token configured every request is allowed.
pub fn authorize<'a>(mut header_values: impl Iterator<Item = &'a str>, expected: Option<&str>) -> bool {
    let expected = match expected {
        Some(t) if !t.is_empty() => t,
        _ => return true,
    };
    header_values.any(|val| {
        val.strip_prefix("Bearer ")
            .or_else(|| val.strip_prefix("bearer "))
            .is_some_and(|token| token == expected)
    })
}
