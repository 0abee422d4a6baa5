// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Access policy documents.
//!
//! A principal's bucket access is one policy document in a canonical shape:
//! a `list` statement over bucket ARNs plus a `readonly` and/or `readwrite`
//! statement over object ARNs. The document is held as raw JSON and mutated
//! in place so statements this module does not own round-trip untouched.

use serde_json::{Value, json};

use deckhand_core::model::AccessLevel;

/// Object read actions.
pub const READ_ACTIONS: &[&str] = &[
    "s3:GetObject",
    "s3:GetObjectAcl",
    "s3:GetObjectVersion",
    "s3:GetObjectVersionAcl",
    "s3:GetObjectVersionTagging",
];

/// Object write actions.
pub const WRITE_ACTIONS: &[&str] = &[
    "s3:DeleteObject",
    "s3:DeleteObjectVersion",
    "s3:PutObject",
    "s3:PutObjectAcl",
    "s3:RestoreObject",
];

/// Bucket metadata actions included in the list statement.
pub const LIST_BUCKET_META_ACTIONS: &[&str] = &[
    "s3:GetBucketPublicAccessBlock",
    "s3:GetBucketPolicyStatus",
    "s3:GetBucketTagging",
    "s3:GetBucketPolicy",
    "s3:GetBucketAcl",
    "s3:GetBucketCORS",
    "s3:GetBucketVersioning",
    "s3:GetBucketLocation",
    "s3:ListBucketVersions",
];

/// Bucket content listing actions.
pub const LIST_BUCKET_CONTENTS_ACTIONS: &[&str] = &["s3:ListBucket"];

const SID_LIST: &str = "list";

/// Fixed serialisation order for the canonical Sids; statements this module
/// does not own sort before all of them, keeping their original order.
fn sid_rank(sid: &str) -> usize {
    match sid {
        SID_LIST => 1,
        "readonly" => 2,
        "readwrite" => 3,
        _ => 0,
    }
}

fn list_actions() -> Vec<&'static str> {
    LIST_BUCKET_META_ACTIONS
        .iter()
        .chain(LIST_BUCKET_CONTENTS_ACTIONS)
        .copied()
        .collect()
}

fn base_statement(sid: &str) -> Value {
    let actions: Vec<&str> = match sid {
        SID_LIST => list_actions(),
        "readonly" => READ_ACTIONS.to_vec(),
        "readwrite" => READ_ACTIONS.iter().chain(WRITE_ACTIONS).copied().collect(),
        _ => unreachable!("unknown base sid"),
    };
    json!({
        "Sid": sid,
        "Action": actions,
        "Effect": "Allow",
    })
}

fn is_base_sid(sid: &str) -> bool {
    matches!(sid, SID_LIST | "readonly" | "readwrite")
}

/// The empty access policy every principal starts from.
pub fn base_policy_document() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "ListUserBuckets",
                "Action": [
                    "s3:ListAllMyBuckets",
                    "s3:ListAccessPoints",
                    "s3:GetAccountPublicAccessBlock",
                ],
                "Effect": "Allow",
                "Resource": "*",
            },
        ],
    })
}

/// Bucket policy denying non-TLS transport, applied to new buckets.
pub fn bucket_tls_policy(bucket_name: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "DenyInsecureTransport",
                "Action": "s3:*",
                "Effect": "Deny",
                "Principal": "*",
                "Resource": [
                    format!("arn:aws:s3:::{}", bucket_name),
                    format!("arn:aws:s3:::{}/*", bucket_name),
                ],
                "Condition": {"Bool": {"aws:SecureTransport": "false"}},
            },
        ],
    })
}

/// Whether `resource` is `arn` itself or a sub-path of it. The character
/// after the prefix must not be a bucket-name character, so an ARN for
/// `bucket` never covers `bucket-2` or `bucket.x`.
fn arn_covers(resource: &str, arn: &str) -> bool {
    match resource.strip_prefix(arn) {
        Some("") => true,
        Some(rest) => {
            let next = rest.chars().next().unwrap();
            !(next.is_ascii_lowercase() || next.is_ascii_digit() || next == '-' || next == '.')
        }
        None => false,
    }
}

/// A principal's access policy document, mutated in place.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    document: Value,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessPolicy {
    /// Start from the base document.
    pub fn new() -> Self {
        Self::from_document(base_policy_document())
    }

    /// Wrap an existing document, normalising the canonical statements:
    /// their Action and Effect are refreshed from the base definitions so
    /// drift in action lists converges on the next write.
    pub fn from_document(mut document: Value) -> Self {
        if !document.is_object() {
            document = base_policy_document();
        }
        let obj = document.as_object_mut().unwrap();
        obj.insert("Version".to_string(), json!("2012-10-17"));
        let statements = obj.entry("Statement").or_insert_with(|| json!([]));
        if !statements.is_array() {
            *statements = json!([]);
        }
        for stmt in statements.as_array_mut().unwrap().iter_mut() {
            let Some(sid) = stmt.get("Sid").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if is_base_sid(&sid) {
                let base = base_statement(&sid);
                let stmt_obj = stmt.as_object_mut().expect("statement is an object");
                for (key, value) in base.as_object().unwrap() {
                    stmt_obj.insert(key.clone(), value.clone());
                }
            }
        }
        Self { document }
    }

    fn statements_mut(&mut self) -> &mut Vec<Value> {
        self.document
            .get_mut("Statement")
            .and_then(Value::as_array_mut)
            .expect("Statement is an array")
    }

    /// Find or build the statement with the given canonical Sid.
    fn statement_mut(&mut self, sid: &str) -> &mut Value {
        let statements = self.statements_mut();
        let position = statements
            .iter()
            .position(|s| s.get("Sid").and_then(Value::as_str) == Some(sid));
        match position {
            Some(index) => &mut statements[index],
            None => {
                statements.push(base_statement(sid));
                statements.last_mut().unwrap()
            }
        }
    }

    fn add_resource(&mut self, arn: &str, sid: &str) {
        let statement = self.statement_mut(sid);
        let resources = statement
            .as_object_mut()
            .unwrap()
            .entry("Resource")
            .or_insert_with(|| json!([]));
        if let Some(list) = resources.as_array_mut() {
            if !list.iter().any(|r| r.as_str() == Some(arn)) {
                list.push(json!(arn));
            }
        }
    }

    fn remove_resource(&mut self, arn: &str, sid: &str) {
        let statements = self.statements_mut();
        let Some(statement) = statements
            .iter_mut()
            .find(|s| s.get("Sid").and_then(Value::as_str) == Some(sid))
        else {
            return;
        };
        if let Some(resources) = statement.get_mut("Resource").and_then(Value::as_array_mut) {
            resources.retain(|r| match r.as_str() {
                Some(resource) => !arn_covers(resource, arn),
                None => true,
            });
        }
    }

    /// Add a bucket ARN to the list statement.
    pub fn grant_list_access(&mut self, bucket_arn: &str) {
        self.add_resource(bucket_arn, SID_LIST);
    }

    /// Add an object ARN (`{arn}/*`) to the statement for a level.
    pub fn grant_object_access(&mut self, arn: &str, level: AccessLevel) {
        self.add_resource(&format!("{}/*", arn), level.sid());
    }

    /// Grant access to a bucket at a level: any existing access to the
    /// bucket is revoked first, then the bucket joins the list statement
    /// and the object ARNs join the level statement. With no paths the
    /// whole bucket is granted.
    pub fn grant_access(&mut self, bucket_arn: &str, level: AccessLevel, paths: &[String]) {
        self.revoke_access(bucket_arn);
        self.grant_list_access(bucket_arn);
        if paths.is_empty() {
            self.grant_object_access(bucket_arn, level);
        } else {
            for path in paths {
                let path = if path.starts_with('/') {
                    path.clone()
                } else {
                    format!("/{}", path)
                };
                self.grant_object_access(&format!("{}{}", bucket_arn, path), level);
            }
        }
    }

    /// Remove every resource covered by the bucket ARN from every level
    /// statement and the list statement. The canonical "revoke all grants
    /// to this bucket for this principal".
    pub fn revoke_access(&mut self, bucket_arn: &str) {
        self.remove_resource(bucket_arn, "readonly");
        self.remove_resource(bucket_arn, "readwrite");
        self.remove_resource(bucket_arn, SID_LIST);
    }

    /// Resources currently held by a canonical statement, for assertions
    /// and membership checks.
    pub fn resources(&self, sid: &str) -> Vec<String> {
        self.document
            .get("Statement")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|s| s.get("Sid").and_then(Value::as_str) == Some(sid))
            .filter_map(|s| s.get("Resource"))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Serialise: canonical statements with no resources are elided and
    /// statement order follows the fixed Sid order. Statements this module
    /// does not own are preserved as loaded.
    pub fn into_document(mut self) -> Value {
        let statements = self.statements_mut();
        statements.retain(|stmt| {
            match stmt.get("Resource") {
                // empty lists are elided; string resources ("*") are kept
                Some(Value::Array(resources)) => !resources.is_empty(),
                Some(_) => true,
                None => false,
            }
        });
        let mut indexed: Vec<(usize, Value)> = statements.drain(..).enumerate().collect();
        indexed.sort_by_key(|(index, stmt)| {
            let rank = stmt
                .get("Sid")
                .and_then(Value::as_str)
                .map(sid_rank)
                .unwrap_or(0);
            (rank, *index)
        });
        *statements = indexed.into_iter().map(|(_, stmt)| stmt).collect();
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: &str = "arn:aws:s3:::test-bucket-1";

    #[test]
    fn test_grant_adds_list_and_level_resources() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readwrite, &[]);

        assert_eq!(policy.resources("list"), vec![BUCKET.to_string()]);
        assert_eq!(
            policy.resources("readwrite"),
            vec![format!("{}/*", BUCKET)]
        );
        assert!(policy.resources("readonly").is_empty());
    }

    #[test]
    fn test_level_transition_moves_object_arn() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readonly, &[]);
        policy.grant_access(BUCKET, AccessLevel::Readwrite, &[]);

        // the readonly statement no longer mentions the bucket, the
        // readwrite one does, and list retains the bucket ARN
        assert!(policy.resources("readonly").is_empty());
        assert_eq!(policy.resources("readwrite"), vec![format!("{}/*", BUCKET)]);
        assert_eq!(policy.resources("list"), vec![BUCKET.to_string()]);
    }

    #[test]
    fn test_grant_with_paths_scopes_object_access() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(
            BUCKET,
            AccessLevel::Readonly,
            &["/data".to_string(), "raw".to_string()],
        );

        let objects = policy.resources("readonly");
        assert_eq!(
            objects,
            vec![format!("{}/data/*", BUCKET), format!("{}/raw/*", BUCKET)]
        );
        // list access is to the bucket itself
        assert_eq!(policy.resources("list"), vec![BUCKET.to_string()]);
    }

    #[test]
    fn test_revoke_removes_bucket_and_subpaths_everywhere() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readonly, &["/data".to_string()]);
        policy.revoke_access(BUCKET);

        for sid in ["list", "readonly", "readwrite"] {
            assert!(policy.resources(sid).is_empty(), "{} not empty", sid);
        }
    }

    #[test]
    fn test_revoke_does_not_touch_shared_prefix_buckets() {
        let other = "arn:aws:s3:::test-bucket-10";
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readwrite, &[]);
        policy.grant_access(other, AccessLevel::Readwrite, &[]);

        policy.revoke_access(BUCKET);

        assert_eq!(policy.resources("list"), vec![other.to_string()]);
        assert_eq!(policy.resources("readwrite"), vec![format!("{}/*", other)]);
    }

    #[test]
    fn test_empty_statements_elided_on_serialise() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readonly, &[]);
        policy.revoke_access(BUCKET);
        let document = policy.into_document();

        let sids: Vec<&str> = document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["Sid"].as_str())
            .collect();
        assert_eq!(sids, vec!["ListUserBuckets"]);
    }

    #[test]
    fn test_round_trip_preserves_canonical_document() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readwrite, &[]);
        let document = policy.into_document();

        let reparsed = AccessPolicy::from_document(document.clone()).into_document();
        assert_eq!(document, reparsed);
    }

    #[test]
    fn test_round_trip_preserves_foreign_statements() {
        let mut document = base_policy_document();
        let foreign = json!({
            "Sid": "AllowKmsDecrypt",
            "Action": ["kms:Decrypt"],
            "Effect": "Allow",
            "Resource": ["arn:aws:kms:eu-west-1:123456789012:key/abc"],
        });
        document["Statement"].as_array_mut().unwrap().push(foreign.clone());

        let mut policy = AccessPolicy::from_document(document);
        policy.grant_access(BUCKET, AccessLevel::Readonly, &[]);
        let out = policy.into_document();

        let statements = out["Statement"].as_array().unwrap();
        assert!(statements.contains(&foreign));
        // foreign statements sort before the canonical ones
        let sids: Vec<&str> = statements.iter().filter_map(|s| s["Sid"].as_str()).collect();
        assert_eq!(sids, vec!["ListUserBuckets", "AllowKmsDecrypt", "list", "readonly"]);
    }

    #[test]
    fn test_statement_order_is_stable() {
        let mut policy = AccessPolicy::new();
        // grant readwrite first, then readonly on another bucket; order in
        // the document is still list, readonly, readwrite
        policy.grant_access(BUCKET, AccessLevel::Readwrite, &[]);
        policy.grant_access("arn:aws:s3:::test-bucket-2", AccessLevel::Readonly, &[]);
        let document = policy.into_document();
        let sids: Vec<&str> = document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["Sid"].as_str())
            .collect();
        assert_eq!(sids, vec!["ListUserBuckets", "list", "readonly", "readwrite"]);
    }

    #[test]
    fn test_action_lists_refreshed_on_load() {
        let mut doc = base_policy_document();
        doc["Statement"].as_array_mut().unwrap().push(json!({
            "Sid": "readwrite",
            "Action": ["s3:GetObject"],
            "Effect": "Allow",
            "Resource": [format!("{}/*", BUCKET)],
        }));

        let policy = AccessPolicy::from_document(doc);
        let document = policy.into_document();
        let readwrite = document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["Sid"] == "readwrite")
            .unwrap();
        let actions = readwrite["Action"].as_array().unwrap();
        assert_eq!(actions.len(), READ_ACTIONS.len() + WRITE_ACTIONS.len());
    }

    #[test]
    fn test_arn_covers_boundaries() {
        assert!(arn_covers(BUCKET, BUCKET));
        assert!(arn_covers(&format!("{}/*", BUCKET), BUCKET));
        assert!(arn_covers(&format!("{}/data/x", BUCKET), BUCKET));
        assert!(!arn_covers("arn:aws:s3:::test-bucket-10", BUCKET));
        assert!(!arn_covers("arn:aws:s3:::test-bucket-1.backup", BUCKET));
        assert!(!arn_covers("arn:aws:s3:::other", BUCKET));
    }

    #[test]
    fn test_bucket_tls_policy_targets_bucket() {
        let policy = bucket_tls_policy("test-bucket-1");
        let resources = policy["Statement"][0]["Resource"].as_array().unwrap();
        assert_eq!(resources[0], "arn:aws:s3:::test-bucket-1");
        assert_eq!(resources[1], "arn:aws:s3:::test-bucket-1/*");
        assert_eq!(policy["Statement"][0]["Effect"], "Deny");
    }

    #[test]
    fn test_duplicate_grant_is_idempotent() {
        let mut policy = AccessPolicy::new();
        policy.grant_access(BUCKET, AccessLevel::Readonly, &[]);
        policy.grant_access(BUCKET, AccessLevel::Readonly, &[]);
        assert_eq!(policy.resources("readonly").len(), 1);
        assert_eq!(policy.resources("list").len(), 1);
    }
}
