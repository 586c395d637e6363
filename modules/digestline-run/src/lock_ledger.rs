//! Cross-run topic locks keyed by a tolerant centroid fingerprint.
//!
//! The same story clustered again on a later run produces a slightly
//! different centroid (items re-embedded, one member more or less). The
//! fingerprint is a random-hyperplane signature: each bit is the side of a
//! fixed pseudo-random hyperplane the centroid falls on, so a small rotation
//! flips a bit only when the centroid sits almost on that hyperplane. The
//! bits closest to flipping are also flipped when checking for a lock.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use digestline_common::{Fingerprint, TopicLock};

use crate::traits::TopicLockStore;

/// Signature length. Unrelated centroids agree on a bit about half the time.
pub const FINGERPRINT_BITS: u32 = 16;

/// Lowest-margin bits whose flipped variants are also checked for a lock.
pub const FLIP_BITS: usize = 2;

const HYPERPLANE_SEED: u64 = 0x6469_6765_7374_6c6e;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Component `dim` of hyperplane `bit`'s normal, uniform in [-1, 1).
fn hyperplane_weight(bit: u32, dim: usize) -> f64 {
    let h = splitmix64(HYPERPLANE_SEED ^ ((bit as u64) << 32) ^ dim as u64);
    (h >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

struct Signature {
    dims: usize,
    bits: u64,
    /// `(|projection| / norm, bit)` per bit.
    margins: Vec<(f64, u32)>,
}

fn signature(centroid: &[f32]) -> Option<Signature> {
    let norm = centroid
        .iter()
        .map(|x| (*x as f64).powi(2))
        .sum::<f64>()
        .sqrt();
    if centroid.is_empty() || norm == 0.0 || !norm.is_finite() {
        return None;
    }

    let mut bits = 0u64;
    let mut margins = Vec::with_capacity(FINGERPRINT_BITS as usize);
    for bit in 0..FINGERPRINT_BITS {
        let projection: f64 = centroid
            .iter()
            .enumerate()
            .map(|(i, x)| *x as f64 * hyperplane_weight(bit, i))
            .sum();
        if projection >= 0.0 {
            bits |= 1 << bit;
        }
        margins.push(((projection / norm).abs(), bit));
    }
    Some(Signature {
        dims: centroid.len(),
        bits,
        margins,
    })
}

fn encode(dims: usize, bits: u64) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((dims as u32).to_le_bytes());
    hasher.update(bits.to_le_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}

/// Tolerant fingerprint of a centroid. `None` for empty or zero vectors.
pub fn fingerprint(centroid: &[f32]) -> Option<Fingerprint> {
    signature(centroid).map(|sig| encode(sig.dims, sig.bits))
}

/// The fingerprint first, then one variant per low-margin bit with that bit
/// flipped. A lock stored under any of them belongs to this topic. Empty for
/// degenerate centroids.
pub fn fingerprint_variants(centroid: &[f32]) -> Vec<Fingerprint> {
    let Some(mut sig) = signature(centroid) else {
        return Vec::new();
    };
    sig.margins.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut variants = vec![encode(sig.dims, sig.bits)];
    variants.extend(
        sig.margins
            .iter()
            .take(FLIP_BITS)
            .map(|&(_, bit)| encode(sig.dims, sig.bits ^ (1 << bit))),
    );
    variants
}

/// Read/write access to topic locks with window semantics.
#[derive(Clone)]
pub struct TopicLockLedger {
    store: Arc<dyn TopicLockStore>,
}

impl TopicLockLedger {
    pub fn new(store: Arc<dyn TopicLockStore>) -> Self {
        Self { store }
    }

    /// The lock for `fingerprint` if one was created within `window_days` of
    /// `now`. Older locks are treated as absent.
    pub async fn check_lock(
        &self,
        fingerprint: &Fingerprint,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<TopicLock>> {
        let since = now - Duration::days(window_days);
        let lock = self.store.find_lock_since(fingerprint, since).await?;
        Ok(lock.filter(|l| l.created_at >= since))
    }

    /// The first lock held by any of `variants` within the window.
    pub async fn check_any(
        &self,
        variants: &[Fingerprint],
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<TopicLock>> {
        for fp in variants {
            if let Some(lock) = self.check_lock(fp, window_days, now).await? {
                return Ok(Some(lock));
            }
        }
        Ok(None)
    }

    pub async fn is_locked(
        &self,
        fingerprint: &Fingerprint,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.check_lock(fingerprint, window_days, now).await?.is_some())
    }

    /// Record a lock. Never fails the caller: errors are logged and reported
    /// as `false`.
    pub async fn create_lock(
        &self,
        fingerprint: &Fingerprint,
        content_id: Uuid,
        now: DateTime<Utc>,
    ) -> bool {
        let lock = TopicLock {
            fingerprint: fingerprint.clone(),
            created_at: now,
            content_id,
        };
        match self.store.insert_lock(&lock).await {
            Ok(()) => {
                debug!(fingerprint = fingerprint.short(), %content_id, "Topic lock created");
                true
            }
            Err(e) => {
                warn!(
                    fingerprint = fingerprint.short(),
                    %content_id,
                    error = %e,
                    "Failed to create topic lock"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyStore;

    fn ledger() -> (TopicLockLedger, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new());
        (TopicLockLedger::new(store.clone()), store)
    }

    fn now() -> DateTime<Utc> {
        "2026-03-15T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let v = vec![0.12f32, -0.4, 0.9, 0.33, -0.05];
        assert_eq!(fingerprint(&v), fingerprint(&v));
        assert_eq!(fingerprint(&v).unwrap().as_str().len(), 64);
    }

    struct Lcg(u64);

    impl Lcg {
        fn uniform(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 11) as f64 / (1u64 << 53) as f64
        }

        /// Roughly normal, variance 1/3.
        fn gaussian(&mut self) -> f64 {
            (0..4).map(|_| self.uniform()).sum::<f64>() - 2.0
        }

        fn vector(&mut self, dim: usize) -> Vec<f64> {
            (0..dim).map(|_| self.gaussian()).collect()
        }
    }

    fn norm(v: &[f64]) -> f64 {
        v.iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    fn cosine(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>() / (norm(a) * norm(b))
    }

    /// `v` plus random noise of relative size `eps`: cosine ≈ 1/√(1+eps²).
    fn perturb(v: &[f64], rng: &mut Lcg, eps: f64) -> Vec<f64> {
        let noise = rng.vector(v.len());
        let scale = eps * norm(v) / norm(&noise);
        v.iter().zip(&noise).map(|(x, n)| x + n * scale).collect()
    }

    fn as_f32(v: &[f64]) -> Vec<f32> {
        v.iter().map(|x| *x as f32).collect()
    }

    #[test]
    fn re_embedded_centroids_find_their_lock() {
        let mut rng = Lcg(7);
        let trials = 200;
        let mut found = 0;
        for _ in 0..trials {
            let original = rng.vector(1024);
            let later = perturb(&original, &mut rng, 0.01414);
            assert!(cosine(&original, &later) > 0.9998);

            let stored = fingerprint(&as_f32(&original)).unwrap();
            if fingerprint_variants(&as_f32(&later)).contains(&stored) {
                found += 1;
            }
        }
        assert!(found >= trials - 4, "only {found}/{trials} centroids matched");
    }

    #[test]
    fn unrelated_centroids_rarely_share_a_lock() {
        let mut rng = Lcg(11);
        let trials = 200;
        let mut collisions = 0;
        for _ in 0..trials {
            let a = as_f32(&rng.vector(1024));
            let b = as_f32(&rng.vector(1024));
            let stored = fingerprint(&a).unwrap();
            if fingerprint_variants(&b).contains(&stored) {
                collisions += 1;
            }
        }
        assert!(collisions <= 2, "{collisions}/{trials} unrelated centroids collided");
    }

    #[test]
    fn variants_lead_with_the_fingerprint() {
        let v = vec![0.12f32, -0.4, 0.9, 0.33, -0.05];
        let variants = fingerprint_variants(&v);
        assert_eq!(variants.len(), 1 + FLIP_BITS);
        assert_eq!(variants.first(), fingerprint(&v).as_ref());
        assert!(fingerprint_variants(&[0.0, 0.0]).is_empty());
    }

    #[tokio::test]
    async fn lock_under_a_flipped_variant_is_found() {
        let (ledger, _) = ledger();
        let v = vec![0.3f32, -0.7, 0.2, 0.9, -0.1, 0.4];
        let variants = fingerprint_variants(&v);
        let content_id = Uuid::new_v4();
        assert!(ledger.create_lock(&variants[1], content_id, now()).await);

        let lock = ledger.check_any(&variants, 2, now()).await.unwrap().unwrap();
        assert_eq!(lock.content_id, content_id);
        assert!(!ledger.is_locked(&variants[0], 2, now()).await.unwrap());
    }

    #[test]
    fn fingerprint_is_scale_invariant() {
        let v = vec![1.0f32, -1.0, 1.0, -1.0];
        let scaled: Vec<f32> = v.iter().map(|x| x * 3.5).collect();
        assert_eq!(fingerprint(&v), fingerprint(&scaled));
    }

    #[test]
    fn opposite_centroids_get_different_fingerprints() {
        let a = vec![1.0f32, -1.0, 1.0, -1.0];
        let b = vec![-1.0f32, 1.0, -1.0, 1.0];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn degenerate_centroids_have_no_fingerprint() {
        assert!(fingerprint(&[]).is_none());
        assert!(fingerprint(&[0.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn lock_from_yesterday_holds_in_two_day_window() {
        let (ledger, _) = ledger();
        let fp = fingerprint(&[1.0, 2.0, 3.0]).unwrap();
        assert!(ledger.create_lock(&fp, Uuid::new_v4(), now() - Duration::days(1)).await);
        assert!(ledger.is_locked(&fp, 2, now()).await.unwrap());
    }

    #[tokio::test]
    async fn lock_expires_once_window_elapsed() {
        let (ledger, _) = ledger();
        let fp = fingerprint(&[1.0, 2.0, 3.0]).unwrap();
        ledger
            .create_lock(&fp, Uuid::new_v4(), now() - Duration::days(1))
            .await;
        let later = now() + Duration::days(1) + Duration::seconds(1);
        assert!(!ledger.is_locked(&fp, 2, later).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_not_locked() {
        let (ledger, _) = ledger();
        let fp = fingerprint(&[3.0, 1.0]).unwrap();
        assert!(!ledger.is_locked(&fp, 2, now()).await.unwrap());
    }

    #[tokio::test]
    async fn create_lock_failure_is_reported_not_raised() {
        let (ledger, store) = ledger();
        store.fail_lock_writes();
        let fp = fingerprint(&[1.0, 1.0]).unwrap();
        assert!(!ledger.create_lock(&fp, Uuid::new_v4(), now()).await);
        assert!(!ledger.is_locked(&fp, 2, now()).await.unwrap());
    }
}
