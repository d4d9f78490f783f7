//! Heartbeat record decoding.
//!
//! Each line on a heartbeat topic is one JSON object describing the
//! component that sent it:
//!
//! ```json
//! {"tenant_name": "logs", "role": "collector", "host": "10.0.0.1", "port": 9001, "pid": 42}
//! ```
//!
//! `cluster_name` and `namespace` are accepted for `tenant_name` and `role`.
//! `port` may be a string or an integer. Every other field becomes part of
//! the component's `last_seen_attrs`.

use logagg_state::{is_key_segment, Attrs, Component, ComponentRole};
use serde_json::Value;

use crate::error::{RegistryError, RegistryResult};

const TENANT_KEYS: &[&str] = &["tenant_name", "cluster_name"];
const ROLE_KEYS: &[&str] = &["role", "namespace"];

/// Decode one heartbeat line read from `topic_tenant`'s heartbeat topic.
///
/// A record without a tenant field is attributed to `topic_tenant`.
pub fn decode_heartbeat(line: &str, topic_tenant: &str) -> RegistryResult<Component> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| RegistryError::MalformedRecord(format!("{e}: {}", preview(line))))?;
    let Value::Object(mut fields) = value else {
        return Err(RegistryError::MalformedRecord(format!(
            "not an object: {}",
            preview(line)
        )));
    };

    let tenant = take_string(&mut fields, TENANT_KEYS)?.unwrap_or_else(|| topic_tenant.to_string());
    let role = take_string(&mut fields, ROLE_KEYS)?
        .ok_or_else(|| RegistryError::MalformedRecord("missing role".to_string()))?;
    let host = take_string(&mut fields, &["host"])?
        .ok_or_else(|| RegistryError::MalformedRecord("missing host".to_string()))?;
    let port = take_port(&mut fields)?;

    if !is_key_segment(&tenant) || !is_key_segment(&host) || !is_key_segment(&port) {
        return Err(RegistryError::MalformedRecord(format!(
            "unusable identity {tenant:?}/{host:?}/{port:?}"
        )));
    }
    let role: ComponentRole = role
        .parse()
        .map_err(|e| RegistryError::MalformedRecord(format!("{e}")))?;

    Ok(Component::new(&tenant, role, &host, &port).with_attrs(fields))
}

/// Remove the first present key of `keys`; remaining aliases are dropped too.
fn take_string(fields: &mut Attrs, keys: &[&str]) -> RegistryResult<Option<String>> {
    let mut found = None;
    for key in keys {
        match fields.remove(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => {
                found.get_or_insert(s);
            }
            Some(other) => {
                return Err(RegistryError::MalformedRecord(format!(
                    "field {key} must be a string, got {other}"
                )));
            }
        }
    }
    Ok(found)
}

fn take_port(fields: &mut Attrs) -> RegistryResult<String> {
    match fields.remove("port") {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) if n.is_u64() => Ok(n.to_string()),
        Some(other) => Err(RegistryError::MalformedRecord(format!(
            "port must be a string or integer, got {other}"
        ))),
        None => Err(RegistryError::MalformedRecord("missing port".to_string())),
    }
}

fn preview(line: &str) -> String {
    line.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_record() {
        let c = decode_heartbeat(
            r#"{"tenant_name":"logs","role":"collector","host":"10.0.0.1","port":"9001","pid":42}"#,
            "logs",
        )
        .unwrap();
        assert_eq!(c.tenant_name, "logs");
        assert_eq!(c.role, ComponentRole::Collector);
        assert_eq!(c.address(), "10.0.0.1:9001");
        assert_eq!(c.last_seen_attrs.get("pid"), Some(&Value::from(42)));
        assert_eq!(c.last_seen_attrs.len(), 1);
    }

    #[test]
    fn accepts_aliases_and_numeric_port() {
        let c = decode_heartbeat(
            r#"{"cluster_name":"logs","namespace":"nsq_api","host":"h","port":1077}"#,
            "other",
        )
        .unwrap();
        assert_eq!(c.tenant_name, "logs");
        assert_eq!(c.role, ComponentRole::QueueApi);
        assert_eq!(c.port, "1077");
        assert!(c.last_seen_attrs.is_empty());
    }

    #[test]
    fn missing_tenant_uses_topic_tenant() {
        let c = decode_heartbeat(r#"{"role":"master","host":"h","port":"1088"}"#, "logs").unwrap();
        assert_eq!(c.tenant_name, "logs");
    }

    #[test]
    fn rejects_malformed_lines() {
        for line in [
            "not json",
            "[1,2]",
            r#"{"host":"h","port":"1"}"#,
            r#"{"role":"collector","port":"1"}"#,
            r#"{"role":"collector","host":"h"}"#,
            r#"{"role":"collector","host":"h","port":-1}"#,
            r#"{"role":"collector","host":"a/b","port":"1"}"#,
            r#"{"role":7,"host":"h","port":"1"}"#,
        ] {
            assert!(
                matches!(decode_heartbeat(line, "logs"), Err(RegistryError::MalformedRecord(_))),
                "{line}"
            );
        }
    }
}
