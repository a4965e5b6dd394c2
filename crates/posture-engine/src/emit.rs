//! Push interface checks use to stream findings.

use crate::normalize::{Disposition, FindingOrigin, Normalizer};
use posture_core::RawFinding;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Receives raw findings from one check invocation
///
/// Each finding is normalized and forwarded to the sink before `emit`
/// returns, so findings emitted before a check fails are never lost and
/// findings from one invocation reach the sink in emission order. Only
/// findings the sink accepted count towards the invocation's total.
pub struct FindingEmitter {
    normalizer: Arc<Normalizer>,
    origin: Arc<FindingOrigin>,
    produced: Arc<AtomicUsize>,
}

impl FindingEmitter {
    pub(crate) const fn new(
        normalizer: Arc<Normalizer>,
        origin: Arc<FindingOrigin>,
        produced: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            normalizer,
            origin,
            produced,
        }
    }

    /// Emit one raw finding
    pub async fn emit(&mut self, finding: RawFinding) -> Disposition {
        let disposition = self.normalizer.submit(&self.origin, finding).await;
        if disposition == Disposition::Emitted {
            self.produced.fetch_add(1, Ordering::Relaxed);
        }
        disposition
    }

    /// Emit several findings in order
    pub async fn emit_all<I>(&mut self, findings: I)
    where
        I: IntoIterator<Item = RawFinding> + Send,
        I::IntoIter: Send,
    {
        for finding in findings {
            self.emit(finding).await;
        }
    }

    /// Findings from this invocation the sink has accepted so far
    #[must_use]
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::Relaxed)
    }

    /// Where emitted findings are attributed
    #[must_use]
    pub fn origin(&self) -> &FindingOrigin {
        &self.origin
    }
}
