// Real-time suspicious-activity screening over recent spin history

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::config::FraudConfig;
use crate::models::{FraudFinding, Severity, SpinRecord};

pub const RULE_HIGH_MULTIPLIER: &str = "high_multiplier";
pub const RULE_EXTREME_RATIO: &str = "extreme_ratio";
pub const RULE_JACKPOT: &str = "jackpot";
pub const RULE_RAPID_FIRE: &str = "rapid_fire";
pub const RULE_WIN_RATE: &str = "win_rate";
pub const RULE_ERRATIC_STAKE: &str = "erratic_stake";

/// Rule evaluation over each user's recent spins. Every decision reads the
/// spin timestamps rather than the wall clock, so a fixed spin sequence
/// produces identical findings on every run.
pub struct FraudDetector {
    cfg: FraudConfig,
    history: Mutex<HashMap<String, VecDeque<SpinRecord>>>,
    /// Last firing per (user, rule), for the dedup cool-down.
    cooldown: Mutex<HashMap<(String, &'static str), DateTime<Utc>>>,
}

impl FraudDetector {
    pub fn new(cfg: FraudConfig) -> Self {
        Self {
            cfg,
            history: Mutex::new(HashMap::new()),
            cooldown: Mutex::new(HashMap::new()),
        }
    }

    /// Record the spin and evaluate all rules against the updated window.
    /// Runs off the settlement's critical path.
    pub async fn evaluate(&self, spin: &SpinRecord) -> Vec<FraudFinding> {
        let window: Vec<SpinRecord> = {
            let mut history = self.history.lock().await;
            let entry = history.entry(spin.user_id.clone()).or_default();
            entry.push_back(spin.clone());
            while entry.len() > self.cfg.history_window {
                entry.pop_front();
            }
            entry.iter().cloned().collect()
        };

        let candidates = [
            self.high_multiplier(spin),
            self.extreme_ratio(spin),
            self.jackpot(spin),
            self.rapid_fire(spin, &window),
            self.win_rate(spin, &window),
            self.erratic_stake(spin, &window),
        ];

        let mut findings = Vec::new();
        let mut cooldown = self.cooldown.lock().await;
        for finding in candidates.into_iter().flatten() {
            let key = (finding.user_id.clone(), finding.rule);
            if let Some(last) = cooldown.get(&key) {
                if spin.created_at - *last < Duration::seconds(self.cfg.cooldown_secs) {
                    continue;
                }
            }
            cooldown.insert(key, spin.created_at);
            findings.push(finding);
        }
        findings
    }

    fn finding(
        &self,
        spin: &SpinRecord,
        rule: &'static str,
        severity: Severity,
        evidence: Vec<SpinRecord>,
    ) -> FraudFinding {
        FraudFinding {
            user_id: spin.user_id.clone(),
            rule,
            severity,
            evidence,
            created_at: spin.created_at,
        }
    }

    fn high_multiplier(&self, spin: &SpinRecord) -> Option<FraudFinding> {
        if spin.bet_amount <= 0 || spin.win_amount <= 0 {
            return None;
        }
        let ratio = spin.win_amount as f64 / spin.bet_amount as f64;
        (ratio > self.cfg.high_multiplier).then(|| {
            self.finding(spin, RULE_HIGH_MULTIPLIER, Severity::High, vec![spin.clone()])
        })
    }

    fn extreme_ratio(&self, spin: &SpinRecord) -> Option<FraudFinding> {
        if spin.bet_amount <= 0 {
            return None;
        }
        let limit = spin.bet_amount.saturating_mul(self.cfg.extreme_ratio);
        (spin.win_amount > limit).then(|| {
            self.finding(spin, RULE_EXTREME_RATIO, Severity::Critical, vec![spin.clone()])
        })
    }

    /// Jackpots are always surfaced for review; a hit is not in itself bad.
    fn jackpot(&self, spin: &SpinRecord) -> Option<FraudFinding> {
        spin.is_jackpot
            .then(|| self.finding(spin, RULE_JACKPOT, Severity::Medium, vec![spin.clone()]))
    }

    fn rapid_fire(&self, spin: &SpinRecord, window: &[SpinRecord]) -> Option<FraudFinding> {
        let cutoff = spin.created_at - Duration::seconds(self.cfg.rapid_fire_window_secs);
        let recent: Vec<SpinRecord> = window
            .iter()
            .filter(|s| s.created_at >= cutoff)
            .cloned()
            .collect();
        (recent.len() >= self.cfg.rapid_fire_count)
            .then(|| self.finding(spin, RULE_RAPID_FIRE, Severity::High, recent))
    }

    fn win_rate(&self, spin: &SpinRecord, window: &[SpinRecord]) -> Option<FraudFinding> {
        if window.len() < self.cfg.win_rate_min_sample {
            return None;
        }
        let wins = window.iter().filter(|s| s.win_amount > s.bet_amount).count();
        let rate = wins as f64 / window.len() as f64;
        (rate > self.cfg.win_rate_threshold).then(|| {
            let evidence = window.iter().rev().take(10).rev().cloned().collect();
            self.finding(spin, RULE_WIN_RATE, Severity::High, evidence)
        })
    }

    /// Compares the incoming stake against the rolling average of the prior
    /// bets in the window, in either direction.
    fn erratic_stake(&self, spin: &SpinRecord, window: &[SpinRecord]) -> Option<FraudFinding> {
        let prior = &window[..window.len().saturating_sub(1)];
        if prior.len() < 3 {
            return None;
        }
        let avg = prior.iter().map(|s| s.bet_amount).sum::<i64>() as f64 / prior.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        let bet = spin.bet_amount as f64;
        let factor = self.cfg.erratic_stake_factor;
        (bet > avg * factor || bet < avg / factor).then(|| {
            self.finding(spin, RULE_ERRATIC_STAKE, Severity::Medium, vec![spin.clone()])
        })
    }
}
