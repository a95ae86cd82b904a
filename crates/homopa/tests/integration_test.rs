//! Integration tests for homopa.
//!
//! Full experiment runs over real region files and loopback TCP. Every test
//! uses its own base port so they can run in parallel.

use homopa::io::{adjacency_file_name, observation_file_name};
use homopa::report::{CONNECTIONS, OUTPUT, REGION_HOMOPATHS, SEEDS, SPANNING_HOMOPATHS};
use homopa::{
    run_experiment, write_hashed_observations, EdgeId, MinHasher, ObservationMode, RegionId,
    RunConfig,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write one region: adjacency lines and raw observation lines.
fn write_region(dir: &Path, region: RegionId, adjacency: &[&[EdgeId]], observations: &[(EdgeId, Vec<u64>)]) {
    let adjacency: Vec<String> = adjacency
        .iter()
        .map(|line| {
            line.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    fs::write(dir.join(adjacency_file_name(region)), adjacency.join("\n")).unwrap();

    let observations: Vec<String> = observations
        .iter()
        .map(|(edge, objects)| {
            std::iter::once(*edge)
                .chain(objects.iter().copied())
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();
    fs::write(
        dir.join(observation_file_name(region, ObservationMode::Raw)),
        observations.join("\n"),
    )
    .unwrap();
}

/// Two linked regions plus one region without homopaths.
///
/// Region 10 walks 1 -> 2 and hands over to region 11 at edge 3.
/// Region 11 walks 3 -> 4. Region 12 sees too few shared objects.
fn create_network(dir: &Path) {
    let ten: Vec<u64> = (1..=10).collect();
    write_region(dir, 10, &[&[1, 2], &[2, 3]], &[(1, ten.clone()), (2, ten)]);

    let three: Vec<u64> = (1..=8).chain([21, 22]).collect();
    let four: Vec<u64> = (1..=6).chain([21, 22]).collect();
    write_region(dir, 11, &[&[3, 4], &[4]], &[(3, three), (4, four)]);

    write_region(
        dir,
        12,
        &[&[5, 6], &[6, 7], &[7]],
        &[(5, vec![30, 31]), (6, vec![32, 33]), (7, vec![34, 35])],
    );
}

/// Convert every raw region file of `create_network` to hashed form.
fn hash_network(dir: &Path, permutations: usize) {
    let hasher = MinHasher::with_seed(permutations, 7);
    for region in [10, 11, 12] {
        write_hashed_observations(
            dir.join(observation_file_name(region, ObservationMode::Raw)),
            dir.join(observation_file_name(region, ObservationMode::Hashed)),
            &hasher,
        )
        .unwrap();
    }
}

fn config(data: &Path, out: &Path, base_port: u16) -> RunConfig {
    RunConfig::default()
        .with_data_dir(data)
        .with_output_dir(out)
        .with_partition_depth(1)
        .with_base_port(base_port)
        .with_barrier_timeout(30)
}

fn spanning_paths(report: &homopa::RunReport) -> Vec<Vec<EdgeId>> {
    report
        .outcome
        .spanning
        .iter()
        .map(|s| s.edges.clone())
        .collect()
}

#[tokio::test]
async fn test_spanning_across_regions() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());

    let report = run_experiment(config(data.path(), out.path(), 23_000))
        .await
        .unwrap();

    assert_eq!(report.regions, vec![10, 11, 12]);
    assert!(report.failed.is_empty());
    assert_eq!(report.workers.len(), 3);
    assert_eq!(report.outcome.ready_count, report.regions.len());
    assert_eq!(report.regions_with_homopaths(), 2);
    assert_eq!(report.outcome.global_objects, 18);
    assert_eq!(report.total_edges, 7);

    assert_eq!(spanning_paths(&report), vec![vec![2, 3, 4], vec![1, 2, 3, 4]]);
    assert!(report.outcome.unspanned.is_empty());
    assert!(report.outcome.spanning.iter().all(|s| s.from == 10 && s.to == 11));
    assert!(report.outcome.costs.transfer_bytes > 0);

    let region_11 = report
        .outcome
        .regions
        .iter()
        .find(|r| r.region == 11)
        .unwrap();
    assert_eq!(region_11.homopaths, vec![vec![4], vec![3, 4]]);

    let output = fs::read_to_string(out.path().join(OUTPUT)).unwrap();
    assert_eq!(output, "2");

    let spanning = fs::read_to_string(out.path().join(SPANNING_HOMOPATHS)).unwrap();
    assert_eq!(spanning, "18,0.5,7,128,0,0,[2,3,4],[1,2,3,4]\n");
    let seeds = fs::read_to_string(out.path().join(SEEDS)).unwrap();
    assert!(seeds.starts_with("0;18,0.5,7,128,0,0,"));

    let connections = fs::read_to_string(out.path().join(CONNECTIONS)).unwrap();
    assert_eq!(
        connections,
        "Region: 10, connects with region: 11, Connections: 2 3\n"
    );

    // Region 12 found nothing, so only two region lines.
    let region_log = fs::read_to_string(out.path().join(REGION_HOMOPATHS)).unwrap();
    assert_eq!(region_log.lines().count(), 2);
    assert!(region_log.contains(",10,[2],[1,2]"));
}

#[tokio::test]
async fn test_spanning_stops_below_threshold() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());

    let report = run_experiment(config(data.path(), out.path(), 23_100).with_threshold(0.8))
        .await
        .unwrap();

    // Edge 4 keeps 6 of the 8 shared objects.
    assert_eq!(spanning_paths(&report), vec![vec![2, 3], vec![1, 2, 3]]);
    assert!(report.outcome.spanning.iter().all(|s| s.appended == 1));
    assert_eq!(report.outcome.unspanned.len(), 1);
    assert_eq!(report.outcome.unspanned[0].region, 11);
    assert_eq!(report.outcome.unspanned[0].edges, vec![4]);
}

#[tokio::test]
async fn test_missing_file_skips_region() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());
    fs::write(data.path().join(adjacency_file_name(13)), "8,9\n9\n").unwrap();

    let report = run_experiment(config(data.path(), out.path(), 23_200))
        .await
        .unwrap();

    assert_eq!(report.skipped, vec![13]);
    assert_eq!(report.regions, vec![10, 11, 12]);
    assert_eq!(report.regions_with_homopaths(), 2);
}

#[tokio::test]
async fn test_malformed_region_fails_alone() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());
    fs::write(
        data.path()
            .join(observation_file_name(12, ObservationMode::Raw)),
        "5,30,x\n",
    )
    .unwrap();

    let report = run_experiment(config(data.path(), out.path(), 23_300))
        .await
        .unwrap();

    assert_eq!(report.failed, vec![12]);
    assert_eq!(report.outcome.ready_count, 2);
    assert_eq!(report.regions_with_homopaths(), 2);
    assert_eq!(report.outcome.spanning.len(), 2);
}

#[tokio::test]
async fn test_hashed_run() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());

    hash_network(data.path(), 128);

    let config = config(data.path(), out.path(), 23_400).with_mode(ObservationMode::Hashed);
    let report = run_experiment(config).await.unwrap();

    assert!(report.failed.is_empty());
    let region_10 = report
        .outcome
        .regions
        .iter()
        .find(|r| r.region == 10)
        .unwrap();
    assert!(region_10.homopaths.contains(&vec![1, 2]));
    assert!(report.regions_with_homopaths() >= 1);
    assert!(out.path().join(OUTPUT).exists());
}

#[tokio::test]
async fn test_short_signatures_fail_their_regions() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());
    hash_network(data.path(), 64);

    let config = config(data.path(), out.path(), 23_600).with_mode(ObservationMode::Hashed);
    assert_eq!(config.num_permutations, 128);
    let report = run_experiment(config).await.unwrap();

    assert_eq!(report.failed, vec![10, 11, 12]);
    assert_eq!(report.outcome.ready_count, 0);
    assert!(report.outcome.spanning.is_empty());
    assert_eq!(report.regions_with_homopaths(), 0);
}

#[tokio::test]
async fn test_matching_permutations_run() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());
    hash_network(data.path(), 64);

    let config = config(data.path(), out.path(), 23_700)
        .with_mode(ObservationMode::Hashed)
        .with_num_permutations(64);
    let report = run_experiment(config).await.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.outcome.ready_count, 3);
    assert_eq!(report.workers.len(), 3);
    assert!(report.regions_with_homopaths() >= 1);
}

#[tokio::test]
async fn test_every_region_reports_ready() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());
    for (region, first) in [(13, 20), (14, 30)] {
        write_region(
            data.path(),
            region,
            &[&[first, first + 1], &[first + 1, first + 2], &[first + 2]],
            &[
                (first, vec![50, 51]),
                (first + 1, vec![52, 53]),
                (first + 2, vec![54, 55]),
            ],
        );
    }

    let report = run_experiment(config(data.path(), out.path(), 23_800))
        .await
        .unwrap();

    assert_eq!(report.regions, vec![10, 11, 12, 13, 14]);
    assert!(report.failed.is_empty());
    assert_eq!(report.outcome.ready_count, report.regions.len());
    assert_eq!(report.workers.len(), 5);
    assert_eq!(report.regions_with_homopaths(), 2);
    assert_eq!(spanning_paths(&report), vec![vec![2, 3, 4], vec![1, 2, 3, 4]]);
}

#[tokio::test]
async fn test_compressed_transfers() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    create_network(data.path());

    let mut config = config(data.path(), out.path(), 23_500);
    config.rpc.compress_transfers = true;
    let report = run_experiment(config).await.unwrap();

    assert_eq!(spanning_paths(&report), vec![vec![2, 3, 4], vec![1, 2, 3, 4]]);
}
