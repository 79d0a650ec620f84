//! Coordinator service
//!
//! This module implements the coordinator side of an averaging round.
//! The coordinator:
//! - Listens for participant connections
//! - Accepts one contribution per participant into the aggregation engine
//! - Answers aggregate requests with the pixel-wise mean image
//! - Optionally spools contributions and the aggregate to disk
//! - Optionally gates the aggregate until the expected number of
//!   participants has contributed

use crate::aggregate::{AggregateError, AggregationEngine};
use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Summary of an aggregation, written next to the spooled aggregate image
#[derive(Debug, Serialize)]
struct RoundSummary {
    contributions: usize,
    width: u32,
    height: u32,
    participants: Vec<String>,
}

/// Shared per-service state
struct Shared {
    engine: AggregationEngine,
    expected_participants: Option<usize>,
    storage_dir: Option<PathBuf>,
}

/// Coordinator service
///
/// Owns one aggregation engine and serves participant connections over TCP.
pub struct Coordinator {
    /// Port to listen on
    listen_port: u16,

    shared: Arc<Shared>,
}

impl Coordinator {
    /// Create a new coordinator
    ///
    /// # Arguments
    ///
    /// * `listen_port` - TCP port to listen on
    /// * `expected_participants` - When set, aggregate requests are refused
    ///   (retryably) until this many contributions have arrived
    /// * `storage_dir` - When set, contributions and the aggregate are
    ///   spooled here as BMP files
    pub fn new(
        listen_port: u16,
        expected_participants: Option<usize>,
        storage_dir: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(ref dir) = storage_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create storage dir: {}", dir.display()))?;
        }

        Ok(Self {
            listen_port,
            shared: Arc::new(Shared {
                engine: AggregationEngine::new(),
                expected_participants,
                storage_dir,
            }),
        })
    }

    /// Run the coordinator service
    ///
    /// Binds the listen port and serves participant connections until the
    /// process is stopped.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind coordinator listener")?;

        println!("Coordinator listening on port {}", self.listen_port);
        if let Some(expected) = self.shared.expected_participants {
            println!("Expecting {} participants per round", expected);
        }
        if let Some(ref dir) = self.shared.storage_dir {
            println!("Spooling images to: {}", dir.display());
        }
        println!("Waiting for participant connections...");

        self.serve(listener).await
    }

    /// Serve participant connections on an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .context("Failed to accept connection")?;

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, shared).await {
                    eprintln!("Connection from {} failed: {:#}", addr, e);
                }
            });
        }
    }
}

/// Handle one participant connection
///
/// Serves messages until the participant disconnects. A protocol-level
/// failure is answered with an Error message; only transport failures tear
/// the connection down.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
) -> Result<()> {
    loop {
        let msg = match read_message(&mut stream).await {
            Ok(msg) => msg,
            Err(_) => {
                // Participant disconnected
                return Ok(());
            }
        };

        let reply = handle_message(&shared, msg, &addr);
        write_message(&mut stream, &reply).await?;
    }
}

/// Compute the reply for one inbound message
///
/// Pure with respect to the transport: all engine and spool effects happen
/// here, the caller only ships the reply back.
fn handle_message(shared: &Shared, msg: Message, addr: &SocketAddr) -> Message {
    match msg {
        Message::Contribute(contribute) => {
            if contribute.protocol_version != PROTOCOL_VERSION {
                return protocol_mismatch(contribute.protocol_version);
            }
            handle_contribute(shared, contribute, addr)
        }
        Message::FetchAggregate(fetch) => {
            if fetch.protocol_version != PROTOCOL_VERSION {
                return protocol_mismatch(fetch.protocol_version);
            }
            handle_fetch(shared, &fetch.participant_id)
        }
        Message::Reset => {
            shared.engine.reset();
            println!("Round reset by {}", addr);
            Message::ResetAck
        }
        other => Message::Error(ErrorMessage {
            error: format!("Unexpected message: {:?}", message_name(&other)),
            retryable: false,
        }),
    }
}

fn handle_contribute(shared: &Shared, contribute: ContributeMessage, addr: &SocketAddr) -> Message {
    let participant_id = contribute.participant_id;

    match shared.engine.accept(&participant_id, &contribute.image) {
        Ok(_) => {
            let contributions = shared.engine.contribution_count();

            if let Some(ref dir) = shared.storage_dir {
                let path = dir.join(format!("{}.bmp", sanitize_participant_id(&participant_id)));
                if let Err(e) = std::fs::write(&path, &contribute.image) {
                    eprintln!("Warning: Failed to spool {}: {}", path.display(), e);
                }
            }

            match shared.expected_participants {
                Some(expected) => println!(
                    "Contribution from {} ({}) accepted ({}/{})",
                    participant_id, addr, contributions, expected
                ),
                None => println!(
                    "Contribution from {} ({}) accepted ({} total)",
                    participant_id, addr, contributions
                ),
            }

            Message::ContributeAck(ContributeAckMessage {
                accepted: true,
                contributions,
            })
        }
        Err(e) => {
            eprintln!("Rejected contribution from {} ({}): {}", participant_id, addr, e);
            Message::Error(ErrorMessage {
                error: e.to_string(),
                retryable: false,
            })
        }
    }
}

fn handle_fetch(shared: &Shared, participant_id: &str) -> Message {
    let contributions = shared.engine.contribution_count();

    if let Some(expected) = shared.expected_participants {
        if contributions < expected {
            return Message::Error(ErrorMessage {
                error: format!(
                    "round incomplete: {} of {} contributions received",
                    contributions, expected
                ),
                retryable: true,
            });
        }
    }

    match shared.engine.aggregate() {
        Ok(result) => {
            println!(
                "Aggregate of {} contributions sent to {}",
                contributions, participant_id
            );

            if let Some(ref dir) = shared.storage_dir {
                spool_aggregate(shared, dir, &result.encoded, result.grid.dimensions());
            }

            Message::Aggregate(AggregateMessage {
                image: result.encoded,
                contributions,
            })
        }
        Err(e) => Message::Error(ErrorMessage {
            retryable: matches!(e, AggregateError::NoContributions),
            error: e.to_string(),
        }),
    }
}

/// Write the aggregate image and a JSON round summary to the spool dir
fn spool_aggregate(shared: &Shared, dir: &std::path::Path, encoded: &[u8], dimensions: (u32, u32)) {
    let image_path = dir.join("aggregated_image.bmp");
    if let Err(e) = std::fs::write(&image_path, encoded) {
        eprintln!("Warning: Failed to write {}: {}", image_path.display(), e);
        return;
    }

    let summary = RoundSummary {
        contributions: shared.engine.contribution_count(),
        width: dimensions.0,
        height: dimensions.1,
        participants: shared.engine.participant_ids(),
    };
    let summary_path = dir.join("round_summary.json");
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&summary_path, json) {
                eprintln!("Warning: Failed to write {}: {}", summary_path.display(), e);
            }
        }
        Err(e) => eprintln!("Warning: Failed to serialize round summary: {}", e),
    }
}

fn protocol_mismatch(got: u32) -> Message {
    Message::Error(ErrorMessage {
        error: format!(
            "protocol version mismatch: coordinator speaks {}, got {}",
            PROTOCOL_VERSION, got
        ),
        retryable: false,
    })
}

fn message_name(msg: &Message) -> &'static str {
    match msg {
        Message::Contribute(_) => "Contribute",
        Message::ContributeAck(_) => "ContributeAck",
        Message::FetchAggregate(_) => "FetchAggregate",
        Message::Aggregate(_) => "Aggregate",
        Message::Reset => "Reset",
        Message::ResetAck => "ResetAck",
        Message::Error(_) => "Error",
    }
}

/// Reduce a participant id to a safe spool file stem
///
/// Keeps ASCII alphanumerics, '-', '_' and '.'; everything else becomes '_'.
/// Ids that reduce to path traversal tokens fall back to "unknown".
fn sanitize_participant_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}
