// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deckhand worker binary.
//!
//! Consumes one of the task queues, or runs an admin subcommand.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use deckhand_cloud::client::CloudConfig;
use deckhand_cloud::credentials::CredentialSet;
use deckhand_cloud::iam::IamClient;
use deckhand_cloud::manager::PolicyManager;
use deckhand_cloud::s3::S3Client;
use deckhand_cloud::trust::TrustConfig;
use deckhand_cluster::helm::Helm;
use deckhand_cluster::kube::{KubeClient, KubeConfig};
use deckhand_core::config::Config;
use deckhand_core::events::EventHub;
use deckhand_core::model::ImageTagKeys;
use deckhand_core::persistence::{PgStore, Store};
use deckhand_identity::client::{IdentityClient, IdentityConfig};
use deckhand_orchestrator::broker::RedisBroker;
use deckhand_orchestrator::context::RuntimeContext;
use deckhand_orchestrator::intents::Intents;
use deckhand_orchestrator::registry::Registry;
use deckhand_orchestrator::tasks::Submitter;
use deckhand_orchestrator::worker::Worker;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QueueName {
    Iam,
    S3,
    Auth,
    Default,
}

#[derive(Debug, Parser)]
#[command(name = "deckhand-worker", about = "Deckhand task worker and admin commands")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume a task queue.
    Worker {
        /// Queue to consume.
        #[arg(long, value_enum, default_value = "default")]
        queue: QueueName,
    },
    /// Attach or detach a managed policy across every user role.
    UpdatePolicyForAllUsers {
        /// Managed policy name.
        #[arg(long)]
        policy_name: String,
        /// Attach when true, detach when false.
        #[arg(long)]
        attach: bool,
    },
    /// Export feedback submissions as CSV.
    ExportFeedback {
        /// Output file path.
        #[arg(long)]
        out: std::path::PathBuf,
    },
}

async fn build_context(config: Config, store: Arc<dyn Store>) -> Result<Arc<RuntimeContext>> {
    let cloud_config = CloudConfig::from_env();
    let credentials = Arc::new(CredentialSet::new());
    let iam = Arc::new(IamClient::new(&cloud_config, credentials.clone()));
    let object_store = Arc::new(S3Client::new(&cloud_config, credentials));
    let policies = Arc::new(PolicyManager::new(iam.clone()));

    let kube = match KubeConfig::load() {
        Ok(kube_config) => Some(Arc::new(KubeClient::new(&kube_config)?)),
        Err(e) => {
            info!(error = %e, "No cluster configuration, cluster operations disabled");
            None
        }
    };

    let identity_config = IdentityConfig::from_env();
    let identity = if identity_config.base_url.is_empty() {
        info!("No identity plane configured");
        None
    } else {
        Some(Arc::new(IdentityClient::new(identity_config)))
    };

    let trust = TrustConfig {
        account_id: cloud_config.account_id.clone(),
        oidc_domain: config.oidc_domain.clone(),
        eks_provider: config.oidc_eks_provider.clone(),
    };

    Ok(Arc::new(RuntimeContext {
        config,
        store,
        events: Arc::new(EventHub::new()),
        object_store,
        iam,
        policies,
        helm: Arc::new(Helm::from_env()),
        kube,
        identity,
        trust,
        image_tag_keys: ImageTagKeys::default(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("deckhand=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        anyhow::Error::from(e)
    })?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    deckhand_core::migrations::run(&pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));

    match cli.command {
        Command::Worker { queue } => {
            let queue_name = match queue {
                QueueName::Iam => config.queues.iam.clone(),
                QueueName::S3 => config.queues.s3.clone(),
                QueueName::Auth => config.queues.auth.clone(),
                QueueName::Default => config.queues.default_queue().to_string(),
            };
            let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
            let ctx = build_context(config, store).await?;
            let registry = Arc::new(Registry::standard());

            let worker = Worker::new(ctx, broker, registry, queue_name);
            let shutdown = worker.shutdown_handle();
            let handle = tokio::spawn(worker.run());

            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            shutdown.notify_waiters();
            handle.await?;
        }
        Command::UpdatePolicyForAllUsers {
            policy_name,
            attach,
        } => {
            let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
            let queues = config.queues.clone();
            let ctx = build_context(config, store.clone()).await?;
            let intents = Intents::new(ctx, Submitter::new(store, broker, queues));
            let task_id = intents
                .update_policy_for_all_users(None, &policy_name, attach)
                .await?;
            info!(task_id = %task_id, policy = %policy_name, attach, "Fan-out task submitted");
        }
        Command::ExportFeedback { out } => {
            let rows = store.list_feedback().await?;
            let mut writer = csv::Writer::from_path(&out)?;
            writer.write_record(["id", "satisfaction_rating", "suggestions", "created_at"])?;
            for row in &rows {
                writer.write_record([
                    row.id.to_string(),
                    row.satisfaction_rating.to_string(),
                    row.suggestions.clone(),
                    row.created_at.to_rfc3339(),
                ])?;
            }
            writer.flush()?;
            info!(count = rows.len(), path = %out.display(), "Feedback exported");
        }
    }

    pool.close().await;
    Ok(())
}
