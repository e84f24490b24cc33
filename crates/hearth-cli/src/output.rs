use hearth_domain::DeviceId;
use serde_json::Value;

/// Render the `/ready` response as human-readable text.
pub fn render_status(healthy: bool, body: &Value) -> String {
    let mut out = String::new();
    out.push_str(if healthy { "server: healthy\n" } else { "server: UNHEALTHY\n" });
    if let Some(components) = body.get("components").and_then(|c| c.as_object()) {
        let mut names: Vec<&String> = components.keys().collect();
        names.sort();
        for name in names {
            let component = &components[name];
            let health = component["health"].as_str().unwrap_or("?");
            match component.get("detail").and_then(|d| d.as_str()) {
                Some(detail) => out.push_str(&format!("  {name}: {health} ({detail})\n")),
                None => out.push_str(&format!("  {name}: {health}\n")),
            }
        }
    }
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Render a twin response as human-readable text.
pub fn render_twin(device: &DeviceId, body: &Value) -> String {
    let twin = &body["twin"];
    let mut out = format!("{device} ({})\n", twin["device_type"].as_str().unwrap_or("?"));
    out.push_str(&format!(
        "  intent:    {}\n",
        render_value(&twin["intent"]["value"])
    ));
    out.push_str(&format!(
        "  reported:  {}{}\n",
        render_value(&twin["reported"]["value"]),
        if twin["reported"]["known"] == Value::Bool(false) { " (unknown)" } else { "" }
    ));
    out.push_str(&format!(
        "  desired:   {}\n",
        render_value(&twin["desired"]["value"])
    ));
    out.push_str(&format!(
        "  converged: {}\n",
        body["converged"].as_bool().unwrap_or(false)
    ));
    out
}

/// Render an override apply response.
pub fn render_override_outcome(body: &Value) -> String {
    match body["outcome"].as_str() {
        Some("APPLIED") => "override applied\n".to_string(),
        Some("MODIFIED") => format!(
            "override applied with safety modification: {} -> {} (rules: {})\n",
            render_value(&body["originalValue"]),
            render_value(&body["modifiedValue"]),
            body["modifyingRules"]
                .as_array()
                .map(|rules| {
                    rules
                        .iter()
                        .filter_map(|r| r.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default()
        ),
        Some("BLOCKED") => format!(
            "override BLOCKED: {}\n",
            body["reason"].as_str().unwrap_or("refused by safety rules")
        ),
        _ => format!("unexpected response: {body}\n"),
    }
}
