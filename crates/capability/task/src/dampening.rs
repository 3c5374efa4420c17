//! 防抖：把单次评估结果折算为是否执行处理器。

use chrono::{DateTime, TimeDelta, Utc};
use domain::duration::parse_duration;
use domain::{Dampening, DampeningType, TaskState};
use std::collections::VecDeque;
use std::time::Duration;

const DEFAULT_HISTORY: usize = 10;

/// 最近若干次评估结果（最新在尾部）。
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    results: VecDeque<bool>,
    capacity: usize,
}

impl ExecutionHistory {
    /// 容量为 `max(N, 10)`，N 取防抖窗口。
    pub fn for_dampening(dampening: &Dampening) -> Self {
        let window = match dampening.dampening_type {
            DampeningType::Consecutive => dampening.occurrences,
            DampeningType::Evaluation => dampening.evaluation,
            DampeningType::None | DampeningType::ActiveDuration => 0,
        };
        let capacity = usize::try_from(window).unwrap_or(usize::MAX).max(DEFAULT_HISTORY);
        Self {
            results: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, triggered: bool) {
        if self.results.len() >= self.capacity {
            self.results.pop_front();
        }
        self.results.push_back(triggered);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// 最新 `n` 次结果。
    fn newest(&self, n: usize) -> impl Iterator<Item = bool> + '_ {
        self.results.iter().rev().take(n).copied()
    }
}

/// 防抖判定结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fire,
    Hold,
    /// 持续触发但未满时长；`remaining` 后需再次评估。
    Pending { remaining: Duration },
}

/// 记录本次结果并给出判定；同时维护 `state.active_since`。
pub fn apply(
    dampening: &Dampening,
    history: &mut ExecutionHistory,
    state: &mut TaskState,
    triggered: bool,
    now: DateTime<Utc>,
) -> Verdict {
    history.push(triggered);
    if triggered {
        state.active_since.get_or_insert(now);
    } else {
        state.active_since = None;
    }

    match dampening.dampening_type {
        DampeningType::None => fire_if(triggered),
        DampeningType::Consecutive => {
            let needed = usize::try_from(dampening.occurrences.max(1)).unwrap_or(usize::MAX);
            fire_if(history.len() >= needed && history.newest(needed).all(|result| result))
        }
        DampeningType::Evaluation => {
            let window = usize::try_from(dampening.evaluation.max(1)).unwrap_or(usize::MAX);
            let needed = usize::try_from(dampening.occurrences.max(1)).unwrap_or(usize::MAX);
            fire_if(history.newest(window).filter(|result| *result).count() >= needed)
        }
        DampeningType::ActiveDuration => {
            if !triggered {
                return Verdict::Hold;
            }
            let required = parse_duration(&dampening.active_duration).unwrap_or(Duration::ZERO);
            let since = state.active_since.unwrap_or(now);
            let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= required {
                Verdict::Fire
            } else {
                Verdict::Pending {
                    remaining: required - elapsed,
                }
            }
        }
    }
}

fn fire_if(condition: bool) -> Verdict {
    if condition { Verdict::Fire } else { Verdict::Hold }
}

/// `active_since` 到达时长的绝对时间点（日志用）。
pub fn deadline(since: DateTime<Utc>, remaining: Duration) -> DateTime<Utc> {
    since + TimeDelta::from_std(remaining).unwrap_or(TimeDelta::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dampening(kind: DampeningType, occurrences: u64, evaluation: u64) -> Dampening {
        Dampening {
            dampening_type: kind,
            occurrences,
            evaluation,
            active_duration: String::new(),
        }
    }

    fn run(config: &Dampening, results: &[bool]) -> Vec<Verdict> {
        let mut history = ExecutionHistory::for_dampening(config);
        let mut state = TaskState::default();
        let now = Utc::now();
        results
            .iter()
            .map(|triggered| apply(config, &mut history, &mut state, *triggered, now))
            .collect()
    }

    #[test]
    fn consecutive_needs_an_unbroken_run() {
        let config = dampening(DampeningType::Consecutive, 3, 0);
        let verdicts = run(&config, &[true, true, true, false, true, true]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Hold,
                Verdict::Hold,
                Verdict::Fire,
                Verdict::Hold,
                Verdict::Hold,
                Verdict::Hold
            ]
        );
    }

    #[test]
    fn evaluation_counts_hits_in_newest_window() {
        let config = dampening(DampeningType::Evaluation, 2, 3);
        let verdicts = run(&config, &[true, false, true, false, false]);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Hold,
                Verdict::Hold,
                Verdict::Fire,
                Verdict::Hold,
                Verdict::Hold
            ]
        );
    }

    #[test]
    fn active_duration_waits_for_the_deadline() {
        let mut config = dampening(DampeningType::ActiveDuration, 0, 0);
        config.active_duration = "10s".to_string();
        let mut history = ExecutionHistory::for_dampening(&config);
        let mut state = TaskState::default();
        let start = Utc::now();

        let first = apply(&config, &mut history, &mut state, true, start);
        assert_eq!(
            first,
            Verdict::Pending {
                remaining: Duration::from_secs(10)
            }
        );
        assert_eq!(state.active_since, Some(start));

        let later = start + TimeDelta::seconds(11);
        assert_eq!(apply(&config, &mut history, &mut state, true, later), Verdict::Fire);

        apply(&config, &mut history, &mut state, false, later);
        assert_eq!(state.active_since, None);
    }

    #[test]
    fn history_is_bounded() {
        let config = dampening(DampeningType::Consecutive, 3, 0);
        let mut history = ExecutionHistory::for_dampening(&config);
        for _ in 0..25 {
            history.push(true);
        }
        assert_eq!(history.len(), 10);
    }
}
