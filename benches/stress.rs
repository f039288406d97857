use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use ulid::Ulid;

use labres::directory::InMemoryTestDirectory;
use labres::engine::{Engine, EngineError};
use labres::model::ReservationFilter;
use labres::notify::NotifyHub;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap()
}

fn fresh_engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join("labres_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{label}_{}.wal", Ulid::new()));
    Arc::new(
        Engine::new(
            path,
            Arc::new(NotifyHub::new()),
            Arc::new(InMemoryTestDirectory::new()),
        )
        .unwrap(),
    )
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let engine = fresh_engine("sequential");
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create(1, 1, 1, base() + TimeDelta::hours(i as i64), 60)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_concurrent() {
    let engine = fresh_engine("concurrent");
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for device_id in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create(device_id, 1, 1, base() + TimeDelta::hours(j), 60)
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} devices x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load() {
    let engine = fresh_engine("read_under_load");
    for i in 0..500 {
        engine
            .create(1, 1, 1, base() + TimeDelta::hours(i), 30)
            .await
            .unwrap();
    }

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                let _ = engine
                    .create(2, 1, 1, base() + TimeDelta::minutes(i * 45), 30)
                    .await;
            }
        })
    };

    let mut list_latencies = Vec::new();
    let mut check_latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        engine.list(&ReservationFilter::device(1)).await.unwrap();
        list_latencies.push(t.elapsed());

        let t = Instant::now();
        engine
            .check_conflict(1, base() + TimeDelta::hours(250), 90, None)
            .await
            .unwrap();
        check_latencies.push(t.elapsed());
    }
    writer.await.unwrap();

    print_latency("list(device) latency", &mut list_latencies);
    print_latency("check_conflict latency", &mut check_latencies);
}

async fn phase4_conflict_storm() {
    let engine = fresh_engine("conflict_storm");
    let n_tasks = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create(1, i, 1, base(), 120).await
        }));
    }

    let mut won = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    println!(
        "  {n_tasks} racing creates: {won} admitted, {rejected} rejected in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, 1, "overlap admitted twice");
}

#[tokio::main]
async fn main() {
    println!("=== labres stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent create throughput");
    phase2_concurrent().await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load().await;

    println!("\n[phase 4] conflict storm");
    phase4_conflict_storm().await;

    println!("\n=== benchmark complete ===");
}
