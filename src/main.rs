use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use ballot_tally::config::{StoreBackend, TallyConfig};
use ballot_tally::domain::bundle::{BallotAnswer, BallotContent, BundleEvent, QuestionAnswer, VoteBallot};
use ballot_tally::domain::numbering::{BallotNumberGeneration, BundleNumberMode, BundleNumberRequest};
use ballot_tally::domain::result::{EntryParams, PoliticalBusinessType, ResultEvent};
use ballot_tally::domain::{CommandContext, ContestState, InMemoryContests};
use ballot_tally::event_sourcing::store::{EventStore, InMemoryEventStore, ScyllaEventStore};
use ballot_tally::metrics::{self, Metrics};
use ballot_tally::service::{ServiceOptions, TallyService};
use ballot_tally::utils::RetryConfig;

type Stores = (Arc<dyn EventStore<ResultEvent>>, Arc<dyn EventStore<BundleEvent>>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TallyConfig::from_env()?;

    // RUST_LOG wins over TALLY_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
        .init();

    tracing::info!("🚀 Starting ballot tally");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    if let Some(port) = config.metrics_port {
        let registry = Arc::new(metrics.registry().clone());
        std::thread::spawn(move || {
            let served = actix_web::rt::System::new().block_on(metrics::start_metrics_server(registry, port));
            if let Err(e) = served {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // === 2. Event stores ===
    let (results, bundles) = connect_stores(&config).await?;

    // === 3. Service and projection ===
    let contests = Arc::new(InMemoryContests::new());
    let options = ServiceOptions {
        signer: config.signer(),
        retry: Some(RetryConfig::for_commands(config.command_max_attempts)),
        metrics: Some(metrics.clone()),
        sample_seed: None,
    };
    let service = TallyService::new(results, bundles, contests.clone(), options);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let polling = service
        .projection()
        .clone()
        .spawn_polling(config.projection_poll_interval, shutdown_rx);

    // === 4. Walk one result through entry, review and publication ===
    let contest_id = Uuid::now_v7();
    contests.set_state(contest_id, ContestState::Active).await;
    run_demo(&service, contest_id).await?;

    let _ = shutdown_tx.send(true);
    polling.await?;

    tracing::info!("🎉 Demo complete!");
    Ok(())
}

async fn connect_stores(config: &TallyConfig) -> anyhow::Result<Stores> {
    match config.store {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory event stores");
            Ok((
                Arc::new(InMemoryEventStore::<ResultEvent>::new()),
                Arc::new(InMemoryEventStore::<BundleEvent>::new()),
            ))
        }
        StoreBackend::Scylla => {
            tracing::info!(node = %config.scylla_node, "Connecting to ScyllaDB...");
            let session: Session = SessionBuilder::new().known_node(&config.scylla_node).build().await?;
            ScyllaEventStore::<ResultEvent>::ensure_schema(&session, &config.keyspace).await?;

            let session = Arc::new(session);
            Ok((
                Arc::new(ScyllaEventStore::<ResultEvent>::new(session.clone(), "PoliticalBusinessResult")),
                Arc::new(ScyllaEventStore::<BundleEvent>::new(session, "ResultBundle")),
            ))
        }
    }
}

async fn run_demo(service: &TallyService, contest_id: Uuid) -> anyhow::Result<()> {
    let clerk = CommandContext::new("erfasser", "counting-circle-a");
    let reviewer = CommandContext::new("pruefer", "counting-circle-a");
    let monitor = CommandContext::new("monitoring", "canton");
    let result_id = Uuid::now_v7();

    service
        .initialize(result_id, Uuid::now_v7(), Uuid::now_v7(), contest_id, PoliticalBusinessType::Vote, &clerk)
        .await?;
    service
        .define_entry(
            result_id,
            EntryParams {
                ballot_bundle_size: Some(10),
                ballot_bundle_sample_size: 2,
                bundle_number_mode: BundleNumberMode::Automatic,
                ballot_number_generation: BallotNumberGeneration::RestartForEachBundle,
            },
            &clerk,
        )
        .await?;
    service.start_submission(result_id, &clerk).await?;

    let bundle = service
        .create_bundle(result_id, BundleNumberRequest::Automatic, None, &clerk)
        .await?;
    tracing::info!("✅ Bundle {} created with number {}", bundle.id, bundle.number);

    for answer in [BallotAnswer::Yes, BallotAnswer::Yes, BallotAnswer::No] {
        let content = BallotContent::Vote(VoteBallot {
            answers: vec![QuestionAnswer { question_number: 1, answer }],
        });
        let number = service.create_ballot(bundle.id, content, &clerk).await?;
        tracing::info!("✅ Ballot {} entered", number);
    }

    let sample = service.bundle_submission_finished(bundle.id, &clerk).await?;
    tracing::info!("🔎 Review sample for bundle {}: {:?}", bundle.number, sample);

    service.succeed_bundle_review(bundle.id, &reviewer).await?;
    service.finish_submission(result_id, &clerk).await?;
    service.audit_tentatively(result_id, &monitor).await?;
    service.plausibilise(result_id, &monitor).await?;
    service.publish(result_id, &monitor).await?;

    let tallies = service.tallies(result_id).await?;
    tracing::info!(
        reviewed_bundles = tallies.reviewed_bundles,
        reviewed_ballots = tallies.reviewed_ballots,
        "📊 Question tallies: {:?}",
        tallies.questions
    );

    if let Some(snapshot) = service.result(result_id).await? {
        tracing::info!(state = ?snapshot.state(), published = snapshot.published(), "✅ Result {}", result_id);
    }
    Ok(())
}
