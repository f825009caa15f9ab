//! Test Client
//!
//! Opens a session, sends random prediction requests over NATS request/reply
//! and fetches the resulting history.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use smart_climate_service::config::AppConfig;
use smart_climate_service::gate::{SessionEvent, SessionToken};
use smart_climate_service::handler::{HistoryEnvelope, HistoryResponse, PredictEnvelope};
use smart_climate_service::{PredictionRequest, PredictionResponse, UserRef};
use std::time::Duration;
use tracing::{info, warn};

/// Request generator for testing
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// A plausible room reading
    fn generate(&mut self) -> PredictionRequest {
        let hour_of_day = self.rng.gen_range(0..24);
        // Offices are mostly empty at night
        let occupancy = if (8..19).contains(&hour_of_day) {
            self.rng.gen_range(0..40)
        } else {
            self.rng.gen_range(0..3)
        };

        PredictionRequest::new(
            round1(self.rng.gen_range(-10.0..40.0)),
            round1(self.rng.gen_range(15.0..32.0)),
            occupancy,
            hour_of_day,
            self.rng.gen_range(0..7),
        )
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_client=info".parse()?),
        )
        .init();

    info!("Starting Test Client");

    // Subjects come from the service configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "No usable configuration; using defaults");
        AppConfig::default()
    });
    let subjects = config.nats;

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).cloned().unwrap_or_else(|| subjects.url.clone());
    let user: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
    let delay_ms: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        user = user,
        count = count,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url.as_str()).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(count, delay_ms).await;
        }
    };

    // Announce a session the way the credential service would
    let token = SessionToken::generate();
    let opened = SessionEvent::Opened {
        token: token.clone(),
        user: UserRef(user),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    };
    client
        .publish(subjects.session_subject.clone(), serde_json::to_vec(&opened)?.into())
        .await?;
    client.flush().await?;
    info!(session = %token, "Session opened");

    let mut generator = RequestGenerator::new();
    let mut served = 0;
    let mut refused = 0;

    for i in 0..count {
        let envelope = PredictEnvelope {
            session: token.clone(),
            request: generator.generate(),
        };
        let payload = serde_json::to_vec(&envelope)?;

        let reply = client
            .request(subjects.predict_subject.clone(), payload.into())
            .await?;
        let response: PredictionResponse = serde_json::from_slice(&reply.payload)?;

        match &response {
            PredictionResponse::Ok { result, record_id } => {
                served += 1;
                info!(
                    record = record_id.0,
                    ac_temp = result.predicted_ac_temp,
                    lights = %result.predicted_light_status,
                    "Prediction {}/{}",
                    i + 1,
                    count
                );
            }
            other => {
                refused += 1;
                warn!(response = ?other, "Prediction {}/{} refused", i + 1, count);
            }
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let history = HistoryEnvelope {
        session: token.clone(),
    };
    let reply = client
        .request(subjects.history_subject.clone(), serde_json::to_vec(&history)?.into())
        .await?;
    match serde_json::from_slice::<HistoryResponse>(&reply.payload)? {
        HistoryResponse::Ok { predictions } => {
            let latest = predictions.last().map(|p| p.prediction.result());
            info!(records = predictions.len(), latest = ?latest, "History fetched");
        }
        other => warn!(response = ?other, "History refused"),
    }

    let closed = SessionEvent::Closed { token };
    client
        .publish(subjects.session_subject.clone(), serde_json::to_vec(&closed)?.into())
        .await?;
    client.flush().await?;

    info!(
        "Completed! Sent {} requests ({} served, {} refused)",
        count, served, refused
    );

    Ok(())
}

async fn run_dry_mode(count: u64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new();
    let token = SessionToken::generate();

    for i in 0..count {
        let envelope = PredictEnvelope {
            session: token.clone(),
            request: generator.generate(),
        };
        let json = serde_json::to_string_pretty(&envelope)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
