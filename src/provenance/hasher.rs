//! SX-014: BLAKE3 digests and deterministic change set names.
//!
//! A change set name is the configured prefix plus the hex digest of every
//! input that shapes the change set. Re-running with identical inputs
//! yields the same name, so a leftover change set is recognised as a
//! conflict instead of piling up duplicates.

use crate::core::types::StackRecord;

/// Hex BLAKE3 digest of NUL-terminated fields.
pub fn composite_digest(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for f in fields {
        hasher.update(f.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex().to_string()
}

/// Deterministic change set name for `record` with its rendered template.
///
/// Covers profile, region, role, every override (path, secret profile and
/// sorted key map), sorted tags and the rendered body. Collection lengths are
/// hashed too, so entries cannot shift between collections unnoticed.
pub fn change_set_name(prefix: &str, record: &StackRecord, rendered: &str) -> String {
    let mut fields: Vec<String> = vec![
        record.profile.clone(),
        record.region.clone(),
        record.role.clone().unwrap_or_default(),
        record.overrides.len().to_string(),
    ];
    for (path, ov) in &record.overrides {
        fields.push(path.clone());
        fields.push(ov.secret_profile.clone().unwrap_or_default());
        fields.push(ov.map.len().to_string());
        for (from, to) in &ov.map {
            fields.push(from.clone());
            fields.push(to.clone());
        }
    }
    fields.push(record.tags.len().to_string());
    for (k, v) in &record.tags {
        fields.push(k.clone());
        fields.push(v.clone());
    }
    fields.push(rendered.to_string());

    let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
    format!("{}{}", prefix, composite_digest(&refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Override, StackFile};
    use proptest::prelude::*;

    fn record() -> StackRecord {
        let file: StackFile = serde_yaml_ng::from_str(
            r#"
stacks:
  app:
    profile: dev
    region: us-west-2
    tags:
      Team: web
    overrides:
      params.env: {}
    template:
      Resources:
        Queue:
          Type: AWS::SQS::Queue
"#,
        )
        .unwrap();
        file.stacks["app"].clone()
    }

    #[test]
    fn test_sx014_name_shape() {
        let name = change_set_name("stax-", &record(), "Resources: {}");
        assert!(name.starts_with("stax-"));
        assert_eq!(name.len(), 5 + 64);
        assert!(name[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sx014_name_deterministic() {
        let r = record();
        assert_eq!(
            change_set_name("stax-", &r, "body"),
            change_set_name("stax-", &r, "body")
        );
    }

    #[test]
    fn test_sx014_every_input_changes_name() {
        let base = record();
        let name = change_set_name("stax-", &base, "body");

        assert_ne!(name, change_set_name("stax-", &base, "body2"));

        let mut r = base.clone();
        r.profile = "prod".into();
        assert_ne!(name, change_set_name("stax-", &r, "body"));

        let mut r = base.clone();
        r.region = "eu-west-1".into();
        assert_ne!(name, change_set_name("stax-", &r, "body"));

        let mut r = base.clone();
        r.role = Some("arn:aws:iam::1:role/deploy".into());
        assert_ne!(name, change_set_name("stax-", &r, "body"));

        let mut r = base.clone();
        r.tags.insert("Owner".into(), "ops".into());
        assert_ne!(name, change_set_name("stax-", &r, "body"));

        let mut r = base.clone();
        r.overrides.insert(
            "secrets.env".into(),
            Override {
                secret_profile: Some("sops".into()),
                map: Default::default(),
            },
        );
        assert_ne!(name, change_set_name("stax-", &r, "body"));

        let mut r = base.clone();
        if let Some(ov) = r.overrides.get_mut("params.env") {
            ov.map.insert("A".into(), "B".into());
        }
        assert_ne!(name, change_set_name("stax-", &r, "body"));
    }

    #[test]
    fn test_sx014_prefix_is_applied() {
        let name = change_set_name("ci-", &record(), "body");
        assert!(name.starts_with("ci-"));
    }

    #[test]
    fn test_sx014_field_boundaries() {
        assert_ne!(composite_digest(&["ab", "c"]), composite_digest(&["a", "bc"]));
        assert_ne!(composite_digest(&["a", "b"]), composite_digest(&["b", "a"]));
    }

    proptest! {
        #[test]
        fn prop_sx014_tag_insertion_order_irrelevant(
            tags in proptest::collection::vec(("[A-Za-z]{1,8}", "[a-z0-9]{0,8}"), 0..8)
        ) {
            let mut forward = record();
            forward.tags.clear();
            for (k, v) in &tags {
                forward.tags.insert(k.clone(), v.clone());
            }
            let mut backward = record();
            backward.tags.clear();
            for (k, v) in tags.iter().rev() {
                backward.tags.entry(k.clone()).or_insert_with(|| v.clone());
            }
            // with duplicate keys the last forward write equals the first backward one
            prop_assert_eq!(
                change_set_name("stax-", &forward, "t"),
                change_set_name("stax-", &backward, "t")
            );
        }

        #[test]
        fn prop_sx014_distinct_bodies_distinct_names(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            let r = record();
            prop_assert_ne!(change_set_name("stax-", &r, &a), change_set_name("stax-", &r, &b));
        }
    }
}
