//! Generated Goldmane protocol client, compiled from `proto_files/goldmane/api.proto`.

#[allow(
    dead_code,
    missing_docs,
    missing_debug_implementations,
    clippy::all,
    clippy::pedantic
)]
pub mod goldmane {
    tonic::include_proto!("goldmane");
}

/// Whether a field holds its zero value and is left out of the JSON output.
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[cfg(test)]
mod tests {
    use super::goldmane::{Flow, FlowKey, PolicyHit};

    #[test]
    fn empty_flow_encodes_as_empty_object() {
        assert_eq!(serde_json::to_string(&Flow::default()).unwrap(), "{}");
    }

    #[test]
    fn only_set_fields_are_encoded() {
        let flow = Flow {
            key: Some(FlowKey {
                dest_name: "cartservice".to_string(),
                dest_port: 7070,
                ..Default::default()
            }),
            bytes_in: 10,
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_string(&flow).unwrap(),
            r#"{"Key":{"dest_name":"cartservice","dest_port":7070},"bytes_in":10}"#
        );
    }

    #[test]
    fn omitted_fields_decode_to_defaults() {
        let hit: PolicyHit = serde_json::from_str(r#"{"name":"allow-dns"}"#).unwrap();

        assert_eq!(hit.name, "allow-dns");
        assert_eq!(hit.rule_index, 0);
        assert!(hit.trigger.is_none());
    }
}
