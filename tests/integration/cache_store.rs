//! Integration tests for the cache store
//!
//! Exercises the public contract end to end: byte-identical round-trips,
//! age expiry with delete-on-miss, and startup maintenance (expired purge
//! plus size eviction). Expiry tests use real (short) ages because the
//! worker compares against file modification times.

use super::test_utils::{png, WEEK};
use anyhow::Result;
use radarloop::cache::CacheStore;
use radarloop::frame::FrameKey;
use radarloop::timegrid::GridTimestamp;
use std::time::Duration;
use tempfile::TempDir;

fn observed(s: &str) -> FrameKey {
    FrameKey::observed(GridTimestamp::parse(s).unwrap())
}

fn forecast(s: &str, offset: u32) -> FrameKey {
    FrameKey::forecast(GridTimestamp::parse(s).unwrap(), offset)
}

#[tokio::test]
async fn test_round_trip_is_byte_identical() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CacheStore::open(dir.path().to_path_buf(), 1024 * 1024, WEEK)?;

    let key = observed("20260807_1430");
    let bytes = png(b"\x00\x01\x02 radar payload \xff\xfe");
    store.put(&key, bytes.clone()).await?;

    assert_eq!(store.get(&key).await?, Some(bytes));
    Ok(())
}

#[tokio::test]
async fn test_observed_and_forecast_keys_do_not_collide() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CacheStore::open(dir.path().to_path_buf(), 1024 * 1024, WEEK)?;

    let obs = observed("20260807_1430");
    let fct = forecast("20260807_1430", 10);
    store.put(&obs, png(b"observed")).await?;
    store.put(&fct, png(b"forecast")).await?;

    assert_eq!(store.get(&obs).await?, Some(png(b"observed")));
    assert_eq!(store.get(&fct).await?, Some(png(b"forecast")));
    Ok(())
}

#[tokio::test]
async fn test_expired_entry_vanishes_from_lookup_and_size() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CacheStore::open(
        dir.path().to_path_buf(),
        1024 * 1024,
        Duration::from_millis(40),
    )?;

    let key = observed("20260807_1430");
    store.put(&key, png(b"short lived")).await?;
    assert!(store.get(&key).await?.is_some());

    std::thread::sleep(Duration::from_millis(100));

    // The failed lookup deletes the file as a side effect.
    assert_eq!(store.get(&key).await?, None);
    assert_eq!(store.size_bytes().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_startup_maintenance_enforces_size_budget() -> Result<()> {
    let dir = TempDir::new()?;
    let payload = png(&[7u8; 100]);
    {
        let store = CacheStore::open(dir.path().to_path_buf(), 1024 * 1024, WEEK)?;
        for (i, ts) in ["20260807_1410", "20260807_1415", "20260807_1420", "20260807_1425"]
            .iter()
            .enumerate()
        {
            store.put(&observed(ts), payload.clone()).await?;
            // Distinct modification times so eviction order is stable.
            if i < 3 {
                std::thread::sleep(Duration::from_millis(30));
            }
        }
    }

    let budget = (payload.len() * 2) as u64;
    let store = CacheStore::open(dir.path().to_path_buf(), budget, WEEK)?;

    assert!(store.size_bytes().await? <= budget);
    // Oldest entries were evicted first; the newest survive.
    assert!(!store.contains(&observed("20260807_1410")).await?);
    assert!(!store.contains(&observed("20260807_1415")).await?);
    assert!(store.contains(&observed("20260807_1420")).await?);
    assert!(store.contains(&observed("20260807_1425")).await?);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_payload_is_treated_as_miss() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CacheStore::open(dir.path().to_path_buf(), 1024 * 1024, WEEK)?;

    let key = observed("20260807_1430");
    store.put(&key, b"error page, not an image".to_vec()).await?;

    assert_eq!(store.get(&key).await?, None);
    assert!(!store.contains(&key).await?);
    Ok(())
}
