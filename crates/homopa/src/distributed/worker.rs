//! Region worker ("regional leader").
//!
//! Loads its region, runs the engine once, signals readiness and then
//! answers coordinator requests one at a time until told to terminate.

use super::barrier::{ReadinessBarrier, WorkerStatus};
use super::messages::{Request, Response};
use super::transport::FrameCodec;
use crate::config::RunConfig;
use crate::engine::{HomopathEngine, HomopathTable};
use crate::io::{LoadError, RegionFiles, RegionInput};
use crate::report::{LogColumns, ResultLog};
use homopa_core::{HomopaError, RegionId};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Errors that stop a worker before it can serve.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] HomopaError),

    #[error("Cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Answers requests from a region's input and homopath table.
#[derive(Debug, Clone)]
pub struct RegionService {
    input: RegionInput,
    table: HomopathTable,
}

impl RegionService {
    #[must_use]
    pub fn new(input: RegionInput, table: HomopathTable) -> Self {
        Self { input, table }
    }

    #[must_use]
    pub fn region(&self) -> RegionId {
        self.input.region
    }

    #[must_use]
    pub fn input(&self) -> &RegionInput {
        &self.input
    }

    #[must_use]
    pub fn table(&self) -> &HomopathTable {
        &self.table
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        if self.table.is_empty() {
            WorkerStatus::ReadyWithoutHomopaths
        } else {
            WorkerStatus::ReadyWithHomopaths
        }
    }

    /// Response to `request`; `None` for terminate.
    #[must_use]
    pub fn respond(&self, request: &Request) -> Option<Response> {
        let response = match request {
            Request::PathMembers(path) => Response::Members(self.table.path_members(path).cloned()),
            Request::EdgeMembers(edge) => Response::Members(self.table.edge_members(*edge).cloned()),
            Request::HomopathTable => {
                Response::Table((!self.table.is_empty()).then(|| self.table.listing()))
            }
            Request::DistinctObjects => {
                Response::DistinctObjects(self.input.distinct.iter().copied().collect())
            }
            Request::ObservationIntegers => Response::IntegerCount(self.input.integers_read),
            Request::Terminate => return None,
        };
        Some(response)
    }

    /// Serve on `listener` until a terminate request arrives. Returns the
    /// number of requests handled, terminate included.
    pub async fn serve(&self, listener: TcpListener, codec: &FrameCodec, timeout: Duration) -> usize {
        let region = self.region();
        let mut served = 0;

        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(region, error = %e, "accept failed");
                    continue;
                }
            };

            let read = codec.read_frame::<_, Request>(&mut stream);
            let request = match tokio::time::timeout(timeout, read).await {
                Ok(Ok(request)) => request,
                Ok(Err(e)) => {
                    warn!(region, %peer, error = %e, "unreadable request");
                    continue;
                }
                Err(_) => {
                    warn!(region, %peer, "request timed out");
                    continue;
                }
            };
            served += 1;
            debug!(region, code = request.code(), "request");

            let Some(response) = self.respond(&request) else {
                info!(region, served, "terminate received");
                return served;
            };
            if let Err(e) = codec.write_frame(&mut stream, &response).await {
                warn!(region, code = request.code(), error = %e, "response not delivered");
            }
        }
    }
}

/// What a worker did.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub region: RegionId,
    pub status: WorkerStatus,
    pub homopaths: usize,
    pub max_length: usize,
    pub rounds: usize,
    pub total_objects: u64,
    pub integers_read: u64,
    pub ingest_bytes: u64,
    pub ingest_cost: f64,
    pub requests_served: usize,
}

/// One region's worker task.
pub struct RegionWorker {
    files: RegionFiles,
    config: RunConfig,
    barrier: ReadinessBarrier,
    log: Option<ResultLog>,
}

impl RegionWorker {
    #[must_use]
    pub fn new(files: RegionFiles, config: RunConfig, barrier: ReadinessBarrier) -> Self {
        Self {
            files,
            config,
            barrier,
            log: None,
        }
    }

    /// Append region logs to `log`.
    #[must_use]
    pub fn with_log(mut self, log: ResultLog) -> Self {
        self.log = Some(log);
        self
    }

    #[must_use]
    pub fn region(&self) -> RegionId {
        self.files.region
    }

    /// Full lifecycle. A worker that fails before serving withdraws from
    /// the barrier so the coordinator stops waiting for it.
    pub async fn run(self) -> Result<WorkerReport, WorkerError> {
        let region = self.region();
        let (service, listener) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(region, error = %e, "region failed to start");
                self.barrier.withdraw(region);
                return Err(e);
            }
        };

        let status = service.status();
        self.barrier.mark_ready(region, status.has_homopaths());

        let codec = FrameCodec::from_config(&self.config.rpc);
        let served = service
            .serve(listener, &codec, self.config.rpc.request_timeout())
            .await;

        let table = service.table();
        let input = service.input();
        Ok(WorkerReport {
            region,
            status,
            homopaths: table.len(),
            max_length: table.max_length(),
            rounds: table.rounds(),
            total_objects: input.total_objects,
            integers_read: input.integers_read,
            ingest_bytes: input.bytes_read(),
            ingest_cost: input.ingest_cost(),
            requests_served: served,
        })
    }

    async fn prepare(&self) -> Result<(RegionService, TcpListener), WorkerError> {
        let region = self.region();
        let mode = self.config.mode;
        let files = self.files.clone();
        let input = tokio::task::spawn_blocking(move || RegionInput::load(&files, mode))
            .await
            .map_err(|e| WorkerError::Task(e.to_string()))??;
        input.check_permutations(self.config.num_permutations)?;
        info!(
            region,
            edges = input.observations.len(),
            objects = input.total_objects,
            "region loaded"
        );

        let engine = HomopathEngine::new(self.config.engine.clone());
        let (input, table) = tokio::task::spawn_blocking(move || {
            let table = engine.discover(&input);
            (input, table)
        })
        .await
        .map_err(|e| WorkerError::Task(e.to_string()))?;
        info!(
            region,
            homopaths = table.len(),
            longest = table.max_length(),
            rounds = table.rounds(),
            "homopaths discovered"
        );

        if let Some(log) = &self.log {
            let columns = LogColumns {
                objects: table.total_objects(),
                threshold: self.config.threshold(),
                edges: input.adjacency.len(),
                permutations: self.config.num_permutations,
                compression: self.config.compression_level,
            };
            if let Err(e) = log.record_region(&columns, &table, input.bytes_read(), input.ingest_cost()) {
                warn!(region, error = %e, "region log not written");
            }
        }

        let address = self.config.rpc.address_for(region)?;
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| WorkerError::Bind { address, source })?;
        debug!(region, "listening");

        Ok((RegionService::new(input, table), listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::observation::{Members, Observation};
    use homopa_core::ObservationMode;

    fn service() -> RegionService {
        let all: std::collections::BTreeSet<u64> = (1..=6).collect();
        let adjacency = [(1, vec![2]), (2, vec![])].into_iter().collect();
        let observations = [
            (1, Observation::Raw(all.clone())),
            (2, Observation::Raw(all)),
        ]
        .into_iter()
        .collect();
        let input = RegionInput::from_parts(3, ObservationMode::Raw, adjacency, observations).unwrap();
        let table = HomopathEngine::new(EngineConfig::default()).discover(&input);
        RegionService::new(input, table)
    }

    #[test]
    fn test_respond_to_lookups() {
        let service = service();
        assert_eq!(service.status(), WorkerStatus::ReadyWithHomopaths);

        match service.respond(&Request::PathMembers(vec![1, 2])) {
            Some(Response::Members(Some(members))) => assert_eq!(members.len(), 6),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(
            service.respond(&Request::PathMembers(vec![2, 1])),
            Some(Response::Members(None))
        );
        match service.respond(&Request::EdgeMembers(1)) {
            Some(Response::Members(Some(Members::Objects(objects)))) => {
                assert_eq!(objects.len(), 6)
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_respond_to_region_queries() {
        let service = service();
        assert_eq!(
            service.respond(&Request::DistinctObjects),
            Some(Response::DistinctObjects((1..=6).collect()))
        );
        assert_eq!(
            service.respond(&Request::ObservationIntegers),
            Some(Response::IntegerCount(14))
        );
        assert_eq!(service.respond(&Request::Terminate), None);

        match service.respond(&Request::HomopathTable) {
            Some(Response::Table(Some(listing))) => {
                assert_eq!(listing.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_until_terminate() {
        let service = service();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let codec = FrameCodec::new(false, 1 << 20);

        let server = tokio::spawn(async move {
            service
                .serve(listener, &codec, Duration::from_secs(5))
                .await
        });

        let client = crate::distributed::RegionClient::new(crate::config::RpcConfig {
            base_port: port,
            ..Default::default()
        });
        assert_eq!(client.observation_integers(0).await.unwrap(), 14);
        assert!(client.homopath_table(0).await.unwrap().is_some());
        client.terminate(0).await.unwrap();

        assert_eq!(server.await.unwrap(), 3);
    }
}
