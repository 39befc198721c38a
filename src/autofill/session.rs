//! One fill session per page load.
//!
//! The session reads the profile once, then fills the form at most once: the
//! `filled` latch is checked at the top of every trigger and set as soon as a
//! fill pass lands at least one value. Triggers are the initial attempt, the
//! first mutation batch that brings fields into the document, fallback timers,
//! and manual requests from the external UI.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::FillConfig;
use crate::dom::{self, Dom, DomEvent, Selector};
use crate::store::{Profile, ProfileStore, Settings, StorePatch};

use super::message::{Request, Response};
use super::scan::{is_recognized_form, scan};
use super::{actuate, matcher, Field, FieldKind, MatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Scanning,
    Filling,
    Done,
}

/// What happened to one field during a fill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Filled,
    /// Recognised and left empty.
    Blank,
    /// No rule produced a value.
    Skipped,
    /// A value was available but no control accepted it.
    NotApplied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOutcome {
    pub question_text: String,
    pub kind: FieldKind,
    pub rule: Option<&'static str>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillReport {
    pub detected: usize,
    pub filled: usize,
    pub blank: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
    /// Whether a submit button was clicked; `None` when auto-submit did not run.
    pub submitted: Option<bool>,
    pub fields: Vec<FieldOutcome>,
}

impl FillReport {
    fn record(&mut self, field: &Field, rule: Option<&'static str>, outcome: Outcome) {
        match &outcome {
            Outcome::Filled => self.filled += 1,
            Outcome::Blank => self.blank += 1,
            Outcome::Skipped | Outcome::NotApplied => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
        self.fields.push(FieldOutcome {
            question_text: field.question_text.clone(),
            kind: field.kind,
            rule,
            outcome,
        });
    }
}

/// Submit buttons, most specific first. Only the first match of each is
/// considered, and only when it has a layout box.
fn submit_selectors() -> Vec<Selector> {
    vec![
        Selector::any()
            .attr_eq("role", "button")
            .attr_contains("aria-label", "Submit"),
        Selector::any()
            .attr_eq("role", "button")
            .attr_contains("aria-label", "submit"),
        Selector::tag("button").attr_eq("type", "submit"),
        Selector::tag("input").attr_eq("type", "submit"),
        Selector::any().attr_eq("jsname", "M2UYVd"),
        Selector::any().attr_eq("data-value", "Submit"),
        Selector::any().class("freebirdFormviewerViewNavigationSubmitButton"),
    ]
}

fn button_selectors() -> Vec<Selector> {
    vec![
        Selector::any().attr_eq("role", "button"),
        Selector::tag("button"),
        Selector::tag("input").attr_eq("type", "button"),
    ]
}

pub struct FillSession {
    profile: Option<Profile>,
    settings: Settings,
    config: FillConfig,
    filled: bool,
    phase: Phase,
    started_at: Instant,
    last_report: Option<FillReport>,
}

impl FillSession {
    pub fn new(profile: Option<Profile>, settings: Settings, config: FillConfig) -> Self {
        Self {
            profile,
            settings,
            config,
            filled: false,
            phase: Phase::Idle,
            started_at: Instant::now(),
            last_report: None,
        }
    }

    /// Start a session from the store. A store that cannot be read yields a
    /// session without a profile, which never touches the document.
    pub async fn load<S: ProfileStore>(store: &S, config: FillConfig) -> Self {
        match store.get().await {
            Ok(snapshot) => {
                if snapshot.user_profile.is_none() {
                    log::info!("no profile saved; nothing will be filled");
                }
                Self::new(snapshot.user_profile.clone(), snapshot.settings(), config)
            }
            Err(err) => {
                log::warn!("failed to read profile store: {err}");
                Self::new(None, Settings::default(), config)
            }
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn last_report(&self) -> Option<&FillReport> {
        self.last_report.as_ref()
    }

    /// Scan and fill once. Returns `None` without touching the document when
    /// the session already filled the page or has no profile.
    pub async fn detect_and_fill<D: Dom, S: ProfileStore>(
        &mut self,
        dom: &D,
        store: &S,
    ) -> Option<FillReport> {
        if self.filled {
            log::debug!("already filled; ignoring trigger");
            return None;
        }
        let profile = self.profile.clone()?;
        let started = Instant::now();

        self.phase = Phase::Scanning;
        let fields = match scan(dom).await {
            Ok(fields) => fields,
            Err(err) => {
                log::warn!("scan failed: {err}");
                self.phase = Phase::Idle;
                return None;
            }
        };
        log::debug!("detected {} fields", fields.len());

        self.phase = Phase::Filling;
        let mut report = FillReport {
            detected: fields.len(),
            ..FillReport::default()
        };
        for field in &fields {
            let rule = matcher::deciding_rule(field).map(|rule| rule.name);
            let value = matcher::match_field(field, &profile);
            let outcome = match value {
                MatchResult::NoValue => Outcome::Skipped,
                ref blank if blank.is_blank() => Outcome::Blank,
                ref value => {
                    let outcome = match actuate::apply(dom, field, value, &self.config.timing).await
                    {
                        Ok(true) => Outcome::Filled,
                        Ok(false) => Outcome::NotApplied,
                        Err(err) => {
                            log::warn!("filling {:?} failed: {err}", field.question_text);
                            Outcome::Failed(err.to_string())
                        }
                    };
                    pause(self.config.timing.pacing(field.kind)).await;
                    outcome
                }
            };
            log::debug!("{:?}: {outcome:?}", field.question_text);
            report.record(field, rule, outcome);
        }

        if report.filled > 0 {
            self.filled = true;
            self.phase = Phase::Done;
            log::info!(
                "filled {} of {} fields in {} ms",
                report.filled,
                report.detected,
                started.elapsed().as_millis()
            );
            self.after_fill(dom, store, &mut report).await;
        } else {
            self.phase = Phase::Idle;
            log::info!("no fields filled ({} detected)", report.detected);
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_report = Some(report.clone());
        Some(report)
    }

    /// Bookkeeping after a successful pass: timestamp, notice, auto-submit.
    async fn after_fill<D: Dom, S: ProfileStore>(
        &self,
        dom: &D,
        store: &S,
        report: &mut FillReport,
    ) {
        let patch = StorePatch {
            last_fill_time: Some(chrono::Utc::now().timestamp_millis()),
            ..StorePatch::default()
        };
        if let Err(err) = store.set(patch).await {
            log::warn!("failed to record fill time: {err}");
        }

        let message = format!("Form auto-filled ({} fields)", report.filled);
        if let Err(err) = dom.show_notice(&message, self.config.timing.notice()).await {
            log::warn!("failed to show notice: {err}");
        }

        // Re-read so a toggle flipped while the page loaded is honoured.
        let auto_submit = match store.get().await {
            Ok(snapshot) => snapshot.settings().auto_submit_enabled,
            Err(_) => self.settings.auto_submit_enabled,
        };
        if !auto_submit {
            log::debug!("auto-submit disabled");
            return;
        }
        pause(self.config.timing.submit_delay()).await;
        match click_submit(dom).await {
            Ok(clicked) => {
                if !clicked {
                    log::warn!("auto-submit: no submit button found");
                }
                report.submitted = Some(clicked);
            }
            Err(err) => {
                log::warn!("auto-submit failed: {err}");
                report.submitted = Some(false);
            }
        }
    }

    /// Automatic mode: fill as soon as the form is usable.
    ///
    /// Tries immediately, then on the first mutation batch that reveals
    /// fields, and at each fallback offset from session start. Returns once
    /// the page is filled or the last fallback has fired.
    pub async fn run_auto<D: Dom, S: ProfileStore>(&mut self, dom: &D, store: &S) {
        if !self.settings.auto_fill_enabled {
            log::info!("auto-fill disabled");
            return;
        }
        if self.profile.is_none() {
            log::info!("no profile; auto-fill idle");
            return;
        }

        let mut mutations = Some(dom.subscribe_mutations());
        if let Some(rx) = mutations.as_mut() {
            rx.borrow_and_update();
        }
        let mut fallbacks: VecDeque<Instant> = self
            .config
            .fallback_delays()
            .into_iter()
            .map(|delay| self.started_at + delay)
            .collect();

        self.detect_and_fill(dom, store).await;

        while !self.filled {
            let Some(&deadline) = fallbacks.front() else {
                break;
            };
            let trigger = tokio::select! {
                changed = next_mutation(&mut mutations) => Trigger::Mutation(changed.is_ok()),
                _ = tokio::time::sleep_until(deadline) => Trigger::Fallback,
            };
            match trigger {
                Trigger::Mutation(false) => {
                    log::warn!("mutation signal closed; relying on fallback timers");
                    mutations = None;
                }
                Trigger::Mutation(true) => {
                    let has_fields = matches!(scan(dom).await, Ok(fields) if !fields.is_empty());
                    if has_fields {
                        log::debug!("fields appeared; disarming mutation trigger");
                        mutations = None;
                        self.detect_and_fill(dom, store).await;
                    }
                }
                Trigger::Fallback => {
                    fallbacks.pop_front();
                    log::debug!("fallback timer fired");
                    self.detect_and_fill(dom, store).await;
                }
            }
        }
    }

    /// Answer one request from the external UI.
    pub async fn handle_request<D: Dom, S: ProfileStore>(
        &mut self,
        dom: &D,
        store: &S,
        request: Request,
    ) -> Response {
        match request {
            Request::FillForm => {
                log::info!("manual fill requested");
                if !self.filled && self.profile.is_none() {
                    self.reload_profile(store).await;
                }
                self.detect_and_fill(dom, store).await;
                Response::Fill {
                    success: self.filled,
                }
            }
            Request::CheckFormStatus => {
                let is_google_form = match dom.location().await {
                    Ok(location) => is_recognized_form(&location),
                    Err(err) => {
                        log::warn!("failed to read page location: {err}");
                        false
                    }
                };
                let form_fields = match scan(dom).await {
                    Ok(fields) => fields.len(),
                    Err(err) => {
                        log::warn!("scan failed: {err}");
                        0
                    }
                };
                Response::Status {
                    is_google_form,
                    is_form_filled: self.filled,
                    form_fields,
                }
            }
        }
    }

    /// Pick up a profile saved after the session started.
    async fn reload_profile<S: ProfileStore>(&mut self, store: &S) {
        match store.get().await {
            Ok(snapshot) => self.profile = snapshot.user_profile,
            Err(err) => log::warn!("failed to read profile store: {err}"),
        }
    }
}

enum Trigger {
    /// `false` when the signal's sender is gone.
    Mutation(bool),
    Fallback,
}

async fn next_mutation(
    rx: &mut Option<watch::Receiver<u64>>,
) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Click the form's submit button. Returns whether one was found.
pub async fn click_submit<D: Dom>(dom: &D) -> dom::Result<bool> {
    for selector in submit_selectors() {
        let Some(&button) = dom.query_all(None, std::slice::from_ref(&selector)).await?.first()
        else {
            continue;
        };
        if dom.visibility(button).await?.has_layout_box {
            log::info!("submitting via {}", selector.to_css());
            dom.dispatch(button, DomEvent::Click).await?;
            return Ok(true);
        }
    }

    for button in dom.query_all(None, &button_selectors()).await? {
        let text = dom.text(button).await?.to_lowercase();
        let label = dom
            .attribute(button, "aria-label")
            .await?
            .unwrap_or_default()
            .to_lowercase();
        if text.contains("submit") || label.contains("submit") {
            log::info!("submitting via button text");
            dom.dispatch(button, DomEvent::Click).await?;
            return Ok(true);
        }
    }
    Ok(false)
}
