// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end task flows over in-memory backends: submit through intents,
//! consume through the worker, observe rows, policies and events.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use deckhand_cloud::error::Result as CloudResult;
use deckhand_cloud::iam::{AttachedPolicy, Iam};
use deckhand_cloud::manager::{INLINE_POLICY_NAME, PolicyManager};
use deckhand_cloud::policy::AccessPolicy;
use deckhand_cloud::s3::{BucketCreated, ObjectStore};
use deckhand_cloud::trust::TrustConfig;
use deckhand_cluster::helm::{Helm, HelmConfig};
use deckhand_core::config::{Config, QueueConfig};
use deckhand_core::events::EventHub;
use deckhand_core::model::{AccessLevel, GrantPrincipal, ImageTagKeys, User};
use deckhand_core::persistence::{MemoryStore, Store};
use deckhand_orchestrator::broker::{Broker, InMemoryBroker};
use deckhand_orchestrator::context::RuntimeContext;
use deckhand_orchestrator::intents::Intents;
use deckhand_orchestrator::registry::Registry;
use deckhand_orchestrator::tasks::Submitter;
use deckhand_orchestrator::worker::Worker;

/// IAM fake holding inline policy documents in memory.
#[derive(Default)]
struct FakeIam {
    inline: Mutex<HashMap<String, Value>>,
    attached: Mutex<HashMap<String, Vec<String>>>,
    roles: Mutex<Vec<String>>,
}

#[async_trait]
impl Iam for FakeIam {
    async fn create_role(&self, name: &str, _: &Value, arns: &[String]) -> CloudResult<()> {
        self.roles.lock().unwrap().push(name.to_string());
        for arn in arns {
            self.attach_policy(name, arn).await?;
        }
        Ok(())
    }
    async fn delete_role(&self, name: &str) -> CloudResult<()> {
        self.roles.lock().unwrap().retain(|r| r != name);
        Ok(())
    }
    async fn attach_policy(&self, role: &str, arn: &str) -> CloudResult<()> {
        let mut attached = self.attached.lock().unwrap();
        let list = attached.entry(role.to_string()).or_default();
        if !list.iter().any(|a| a == arn) {
            list.push(arn.to_string());
        }
        Ok(())
    }
    async fn detach_policy(&self, role: &str, arn: &str) -> CloudResult<()> {
        if let Some(list) = self.attached.lock().unwrap().get_mut(role) {
            list.retain(|a| a != arn);
        }
        Ok(())
    }
    async fn list_attached_policies(&self, role: &str) -> CloudResult<Vec<AttachedPolicy>> {
        Ok(self
            .attached
            .lock()
            .unwrap()
            .get(role)
            .map(|arns| {
                arns.iter()
                    .map(|arn| AttachedPolicy {
                        name: arn.rsplit('/').next().unwrap_or(arn).to_string(),
                        arn: arn.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
    async fn list_role_names(&self, _: &str) -> CloudResult<Vec<String>> {
        Ok(self.roles.lock().unwrap().clone())
    }
    async fn get_inline_policy(&self, role: &str, _: &str) -> CloudResult<Option<Value>> {
        Ok(self.inline.lock().unwrap().get(role).cloned())
    }
    async fn put_inline_policy(&self, role: &str, _: &str, doc: &Value) -> CloudResult<()> {
        self.inline
            .lock()
            .unwrap()
            .insert(role.to_string(), doc.clone());
        Ok(())
    }
    async fn delete_inline_policy(&self, role: &str, _: &str) -> CloudResult<()> {
        self.inline.lock().unwrap().remove(role);
        Ok(())
    }
    async fn create_policy(&self, name: &str, path: &str, _: &Value) -> CloudResult<String> {
        Ok(format!("arn:aws:iam::123456789012:policy{}{}", path, name))
    }
    async fn delete_policy(&self, _: &str) -> CloudResult<()> {
        Ok(())
    }
    async fn get_default_policy_document(&self, arn: &str) -> CloudResult<Option<Value>> {
        Ok(self.inline.lock().unwrap().get(arn).cloned())
    }
    async fn create_policy_version(&self, arn: &str, doc: &Value, _: bool) -> CloudResult<()> {
        self.inline
            .lock()
            .unwrap()
            .insert(arn.to_string(), doc.clone());
        Ok(())
    }
    async fn prune_policy_versions(&self, _: &str) -> CloudResult<()> {
        Ok(())
    }
    async fn attached_roles(&self, arn: &str) -> CloudResult<Vec<String>> {
        Ok(self
            .attached
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, arns)| arns.iter().any(|a| a == arn))
            .map(|(role, _)| role.clone())
            .collect())
    }
}

/// Object store fake recording bucket operations.
#[derive(Default)]
struct FakeObjectStore {
    created: Mutex<Vec<(String, bool)>>,
    tags: Mutex<HashMap<String, Vec<(String, String)>>>,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn create_bucket(&self, name: &str, warehouse: bool) -> CloudResult<BucketCreated> {
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), warehouse));
        Ok(BucketCreated {
            location: format!("/{}", name),
        })
    }
    async fn enable_versioning(&self, _: &str) -> CloudResult<()> {
        Ok(())
    }
    async fn put_bucket_lifecycle(&self, _: &str) -> CloudResult<()> {
        Ok(())
    }
    async fn tag_bucket(&self, name: &str, tags: &[(String, String)]) -> CloudResult<()> {
        self.tags
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(tags);
        Ok(())
    }
    async fn exists(&self, name: &str) -> CloudResult<bool> {
        Ok(self.created.lock().unwrap().iter().any(|(n, _)| n == name))
    }
    async fn list_buckets(&self) -> CloudResult<Vec<String>> {
        Ok(self
            .created
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect())
    }
}

struct Harness {
    ctx: Arc<RuntimeContext>,
    broker: Arc<InMemoryBroker>,
    iam: Arc<FakeIam>,
    object_store: Arc<FakeObjectStore>,
    store: Arc<MemoryStore>,
    intents: Intents,
}

fn test_config() -> Config {
    Config {
        env: "test".to_string(),
        database_url: "postgres://unused".to_string(),
        broker_url: "redis://unused".to_string(),
        queues: QueueConfig {
            iam: "control-panel-iam".to_string(),
            s3: "control-panel-s3".to_string(),
            auth: "control-panel-auth".to_string(),
        },
        task_age_cutoff_days: 3,
        tools_domain: "tools.example.com".to_string(),
        apps_domain: "apps.example.com".to_string(),
        efs_volume: String::new(),
        oidc_domain: "auth.example.com".to_string(),
        oidc_eks_provider: "oidc.eks.example.com/id/ABC".to_string(),
        control_namespace: "cpanel".to_string(),
        max_release_name_len: 53,
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let iam = Arc::new(FakeIam::default());
    let object_store = Arc::new(FakeObjectStore::default());
    let broker = Arc::new(InMemoryBroker::new());
    let config = test_config();

    let ctx = Arc::new(RuntimeContext {
        config: config.clone(),
        store: store.clone(),
        events: Arc::new(EventHub::new()),
        object_store: object_store.clone(),
        iam: iam.clone(),
        policies: Arc::new(PolicyManager::new(iam.clone())),
        helm: Arc::new(Helm::new(HelmConfig {
            repo_name: "mojanalytics".to_string(),
            repo_url: String::new(),
            cache_dir: PathBuf::from(".helm-cache-test"),
            uninstall_timeout: Duration::from_secs(300),
        })),
        kube: None,
        identity: None,
        trust: TrustConfig {
            account_id: "123456789012".to_string(),
            oidc_domain: config.oidc_domain.clone(),
            eks_provider: config.oidc_eks_provider.clone(),
        },
        image_tag_keys: ImageTagKeys::default(),
    });

    let submitter = Submitter::new(store.clone(), broker.clone(), config.queues);
    let intents = Intents::new(ctx.clone(), submitter);
    Harness {
        ctx,
        broker,
        iam,
        object_store,
        store,
        intents,
    }
}

fn alice(superuser: bool) -> User {
    User {
        auth0_id: "github|alice".to_string(),
        username: "alice".to_string(),
        name: "Alice Jones".to_string(),
        email: "alice@example.com".to_string(),
        email_verified: true,
        is_superuser: superuser,
        created_at: chrono::Utc::now(),
    }
}

/// Drain every queue through the worker until nothing is left.
async fn drain(harness: &Harness) {
    let registry = Arc::new(Registry::standard());
    for queue in ["control-panel-iam", "control-panel-s3", "control-panel-auth"] {
        let worker = Worker::new(
            harness.ctx.clone(),
            harness.broker.clone(),
            registry.clone(),
            queue,
        );
        while let Ok(Some(frame)) = harness
            .broker
            .receive(queue, Duration::from_millis(1))
            .await
        {
            worker.process_frame(&frame).await;
        }
    }
}

async fn alice_policy(harness: &Harness) -> AccessPolicy {
    let doc = harness
        .iam
        .get_inline_policy("test_user_alice", INLINE_POLICY_NAME)
        .await
        .unwrap()
        .expect("alice has an inline policy");
    AccessPolicy::from_document(doc)
}

#[tokio::test]
async fn create_bucket_provisions_and_grants_creator() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();
    let mut events = harness.ctx.events.subscribe("github|alice");

    let bucket = harness
        .intents
        .create_bucket("github|alice", "test-bucket-1", false)
        .await
        .unwrap();
    assert_eq!(bucket.name, "test-bucket-1");

    // a creator admin grant row exists before any worker runs
    let grants = harness.store.grants_for_bucket(bucket.id).await.unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].access_level, AccessLevel::Readwrite);
    assert!(matches!(
        grants[0].principal,
        GrantPrincipal::User { is_admin: true, .. }
    ));

    drain(&harness).await;

    // the bucket hit the object store
    assert_eq!(
        harness.object_store.created.lock().unwrap().as_slice(),
        &[("test-bucket-1".to_string(), false)]
    );
    assert_eq!(
        harness
            .store
            .get_bucket(bucket.id)
            .await
            .unwrap()
            .unwrap()
            .location_url
            .as_deref(),
        Some("/test-bucket-1")
    );

    // alice's inline policy lists the bucket and grants readwrite objects
    let policy = alice_policy(&harness).await;
    assert_eq!(policy.resources("list"), vec!["arn:aws:s3:::test-bucket-1"]);
    assert_eq!(
        policy.resources("readwrite"),
        vec!["arn:aws:s3:::test-bucket-1/*"]
    );

    // completion emitted a taskStatus event to the submitting user
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        if event.event == "taskStatus" {
            let data: Value = serde_json::from_str(&event.data).unwrap();
            if data["entity_name"] == "test-bucket-1" && data["status"] == "COMPLETED" {
                saw_completed = true;
            }
        }
    }
    assert!(saw_completed, "expected a COMPLETED taskStatus event");
}

#[tokio::test]
async fn bucket_without_env_prefix_is_rejected() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();

    let err = harness
        .intents
        .create_bucket("github|alice", "foo-bucket", false)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");
    assert!(err.to_string().contains("test-"), "got: {}", err);
}

#[tokio::test]
async fn grant_level_transition_moves_object_arn() {
    let harness = harness();
    harness.store.upsert_user(&alice(false)).await.unwrap();
    let bucket = harness
        .intents
        .create_bucket("github|alice", "test-bucket-1", false)
        .await
        .unwrap();
    drain(&harness).await;

    // downgrade to readonly, then drain the grant task
    harness
        .intents
        .grant_bucket_access(
            "github|alice",
            GrantPrincipal::User {
                user_id: "github|alice".to_string(),
                is_admin: true,
            },
            bucket.id,
            AccessLevel::Readonly,
            vec![],
        )
        .await
        .unwrap();
    drain(&harness).await;

    let policy = alice_policy(&harness).await;
    assert!(policy.resources("readwrite").is_empty());
    assert_eq!(
        policy.resources("readonly"),
        vec!["arn:aws:s3:::test-bucket-1/*"]
    );
    // the list statement still carries the bucket ARN
    assert_eq!(policy.resources("list"), vec!["arn:aws:s3:::test-bucket-1"]);

    // still a single grant row: updates modify in place
    assert_eq!(
        harness.store.grants_for_bucket(bucket.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn revoke_removes_every_arn_for_the_bucket() {
    let harness = harness();
    harness.store.upsert_user(&alice(false)).await.unwrap();
    let bucket = harness
        .intents
        .create_bucket("github|alice", "test-bucket-1", false)
        .await
        .unwrap();
    drain(&harness).await;

    let grants = harness.store.grants_for_bucket(bucket.id).await.unwrap();
    harness
        .intents
        .revoke_bucket_access(
            "github|alice",
            deckhand_core::persistence::GrantKind::User,
            grants[0].id,
        )
        .await
        .unwrap();
    drain(&harness).await;

    let policy = alice_policy(&harness).await;
    for sid in ["list", "readonly", "readwrite"] {
        assert!(
            policy.resources(sid).is_empty(),
            "statement '{}' still mentions the bucket",
            sid
        );
    }
    assert!(
        harness
            .store
            .grants_for_bucket(bucket.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn archive_bucket_tags_and_revokes_all() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();
    let bucket = harness
        .intents
        .create_bucket("github|alice", "test-bucket-1", false)
        .await
        .unwrap();
    drain(&harness).await;

    harness
        .intents
        .archive_bucket("github|alice", bucket.id)
        .await
        .unwrap();
    drain(&harness).await;

    let tags = harness.object_store.tags.lock().unwrap();
    assert!(
        tags.get("test-bucket-1")
            .unwrap()
            .contains(&("to-archive".to_string(), "true".to_string()))
    );
    drop(tags);

    let policy = alice_policy(&harness).await;
    assert!(policy.resources("readwrite").is_empty());
    assert!(
        harness
            .store
            .get_bucket(bucket.id)
            .await
            .unwrap()
            .unwrap()
            .is_deleted
    );
}

#[tokio::test]
async fn completed_tasks_are_not_rerun() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();
    harness
        .intents
        .create_bucket("github|alice", "test-bucket-1", false)
        .await
        .unwrap();

    // capture the s3 frame so it can be replayed after completion
    let frames = harness.broker.queued("control-panel-s3");
    assert_eq!(frames.len(), 1);
    drain(&harness).await;
    assert_eq!(harness.object_store.created.lock().unwrap().len(), 1);

    // at-least-once redelivery of an already-completed task is a no-op
    let registry = Arc::new(Registry::standard());
    let worker = Worker::new(
        harness.ctx.clone(),
        harness.broker.clone(),
        registry,
        "control-panel-s3",
    );
    worker.process_frame(&frames[0]).await;
    assert_eq!(harness.object_store.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_tool_is_a_validation_failure() {
    let harness = harness();
    harness.store.upsert_user(&alice(false)).await.unwrap();

    let err = harness
        .intents
        .deploy_tool("github|alice", "not-a-tool", None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");
}

#[tokio::test]
async fn policy_fanout_attaches_to_every_user_role() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();
    let bob = User {
        auth0_id: "github|bob".to_string(),
        username: "bob".to_string(),
        ..alice(false)
    };
    harness.store.upsert_user(&bob).await.unwrap();

    let policy = harness
        .intents
        .create_policy("github|alice", "analysts")
        .await
        .unwrap();
    harness
        .intents
        .update_policy_for_all_users(Some("github|alice"), "analysts", true)
        .await
        .unwrap();
    drain(&harness).await;

    for role in ["test_user_alice", "test_user_bob"] {
        let attached = harness.iam.list_attached_policies(role).await.unwrap();
        assert!(
            attached.iter().any(|p| p.arn == policy.arn),
            "{} missing the policy",
            role
        );
    }
}

#[tokio::test]
async fn group_grant_applies_inline_to_managed_policy() {
    let harness = harness();
    harness.store.upsert_user(&alice(true)).await.unwrap();
    let bucket = harness
        .intents
        .create_bucket("github|alice", "test-bucket-2", false)
        .await
        .unwrap();
    let policy = harness
        .intents
        .create_policy("github|alice", "analysts")
        .await
        .unwrap();

    harness
        .intents
        .grant_bucket_access(
            "github|alice",
            GrantPrincipal::Policy {
                policy_id: policy.id,
            },
            bucket.id,
            AccessLevel::Readonly,
            vec![],
        )
        .await
        .unwrap();

    // applied inline on the request path, no task involved
    let doc = harness
        .iam
        .get_default_policy_document(&policy.arn)
        .await
        .unwrap()
        .expect("managed policy document written");
    let access = AccessPolicy::from_document(doc);
    assert_eq!(access.resources("list"), vec!["arn:aws:s3:::test-bucket-2"]);
    assert_eq!(
        access.resources("readonly"),
        vec!["arn:aws:s3:::test-bucket-2/*"]
    );
}

#[tokio::test]
async fn first_login_creates_role_with_default_policies() {
    let harness = harness();
    let user = alice(false);
    harness.intents.on_first_login(&user).await.unwrap();

    assert!(
        harness
            .iam
            .roles
            .lock()
            .unwrap()
            .contains(&"test_user_alice".to_string())
    );
    let attached = harness
        .iam
        .list_attached_policies("test_user_alice")
        .await
        .unwrap();
    let names: HashSet<String> = attached.into_iter().map(|p| p.name).collect();
    assert!(names.contains("test-read-user-roles-inline-policies"));

    // second login does not re-provision
    harness.intents.on_first_login(&user).await.unwrap();
    assert_eq!(
        harness
            .iam
            .roles
            .lock()
            .unwrap()
            .iter()
            .filter(|r| *r == "test_user_alice")
            .count(),
        1
    );
}
