use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// 缺页统计，只作为可观察的副作用，不参与任何决策
#[derive(Default)]
pub struct FaultStats {
    faults: AtomicUsize,
    resolved: AtomicUsize,
    references: AtomicUsize,
}

impl FaultStats {
    pub fn record_fault(&self, resolved: bool) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        if resolved {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reference(&self) {
        self.references.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            faults: self.faults.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            references: self.references.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// 进入缺页处理的次数
    pub faults: usize,
    /// 成功换入的次数
    pub resolved: usize,
    /// 成功的访存次数
    pub references: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SPF/PF/REF = ({}/{}/{})",
            self.resolved, self.faults, self.references
        )
    }
}
