//! Drives the mockup editor from "just opened" to "image placed, 16:9,
//! Mockup tab showing".
//!
//! Phases run strictly in order and every one of them is best effort: a
//! missing control or an exhausted poll degrades the phase and the run moves
//! on. Only page-driver failures and payload conversion errors abort.
//!
//! Layout configuration is spawned as a detached task once the primary
//! image has been handed over. [`Sequencer::run`] returns before it
//! finishes; whoever holds the [`Run`] may watch it, the activation caller
//! never does.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Profile;
use crate::page::{ElementInfo, ElementRef, PageError, TargetPage, tolerate_missing};
use crate::payload::{PayloadError, PayloadResolver};
use crate::poll::poll_until;
use crate::types::{ActivationRequest, Phase, PhaseOutcome, RunReport};

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Fold a phase result into its outcome. A vanished element is a degraded
/// phase, anything else is an abort.
fn settle(phase: Phase, result: Result<PhaseOutcome, RunError>) -> PhaseOutcome {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(RunError::Page(PageError::ElementMissing(what))) => {
            PhaseOutcome::Degraded(format!("element vanished: {what}"))
        }
        Err(e) => PhaseOutcome::Aborted(e.to_string()),
    };
    match &outcome {
        PhaseOutcome::Completed => info!(?phase, "Phase completed"),
        PhaseOutcome::Degraded(why) => warn!(?phase, reason = %why, "Phase degraded"),
        PhaseOutcome::Aborted(why) => warn!(?phase, error = %why, "Phase aborted, run ends"),
    }
    outcome
}

async fn pause(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A started run: the phases up to the primary upload, plus the detached
/// layout task if the run got that far.
pub struct Run {
    pub report: RunReport,
    pub layout: Option<JoinHandle<RunReport>>,
}

impl Run {
    /// Wait for the layout task too and return the whole report.
    pub async fn finish(self) -> RunReport {
        let mut report = self.report;
        if let Some(layout) = self.layout {
            match layout.await {
                Ok(rest) => report.extend(rest),
                Err(e) => report.record(
                    Phase::LayoutConfiguration,
                    PhaseOutcome::Aborted(format!("layout task failed: {e}")),
                ),
            }
        }
        report
    }
}

#[derive(Clone)]
pub struct Sequencer {
    page: Arc<dyn TargetPage>,
    profile: Arc<Profile>,
    payloads: PayloadResolver,
}

impl Sequencer {
    pub fn new(page: Arc<dyn TargetPage>, profile: Arc<Profile>, payloads: PayloadResolver) -> Self {
        Self {
            page,
            profile,
            payloads,
        }
    }

    pub async fn run(&self, request: ActivationRequest) -> Run {
        let mut report = RunReport::default();

        match self.page.host().await {
            Ok(host) if self.profile.host_matches(&host) => {
                report.record(Phase::EntryGuard, PhaseOutcome::Completed);
            }
            Ok(host) => {
                debug!(%host, expected = %self.profile.expected_host, "Not the editor, nothing to do");
                report.record(
                    Phase::EntryGuard,
                    PhaseOutcome::Degraded(format!("host {host} is not the editor")),
                );
                return Run {
                    report,
                    layout: None,
                };
            }
            Err(e) => {
                report.record(
                    Phase::EntryGuard,
                    settle(Phase::EntryGuard, Err(e.into())),
                );
                return Run {
                    report,
                    layout: None,
                };
            }
        }

        let outcome = settle(Phase::ResetIfOccupied, self.reset_if_occupied().await);
        let stop = outcome.is_aborted();
        report.record(Phase::ResetIfOccupied, outcome);
        if stop {
            return Run {
                report,
                layout: None,
            };
        }

        let outcome = settle(
            Phase::PrimaryUpload,
            self.primary_upload(&request.primary).await,
        );
        let stop = outcome.is_aborted();
        report.record(Phase::PrimaryUpload, outcome);
        if stop {
            return Run {
                report,
                layout: None,
            };
        }

        let this = self.clone();
        let layout = tokio::spawn(async move { this.configure_layout(request.secondary).await });
        Run {
            report,
            layout: Some(layout),
        }
    }

    async fn reset_if_occupied(&self) -> Result<PhaseOutcome, RunError> {
        let sel = &self.profile.selectors;
        let timings = &self.profile.timings;

        if self.page.count(None, &sel.existing_image).await? == 0 {
            return Ok(PhaseOutcome::Completed);
        }
        info!("Editor already holds an image, starting over");

        if self.page.count(None, &sel.start_new).await? == 0 {
            return Ok(PhaseOutcome::Degraded(
                "start-new control not found, uploading on top".into(),
            ));
        }
        self.page
            .pointer_click(&ElementRef::first(&sel.start_new))
            .await?;

        let page = self.page.as_ref();
        let buttons_selector = sel.dialog_buttons.as_str();
        let buttons = poll_until(timings.reset_dialog_poll, move || async move {
            let buttons = page.query(None, buttons_selector).await?;
            Ok::<_, PageError>((!buttons.is_empty()).then_some(buttons))
        })
        .await?;
        match buttons {
            Some(buttons) => match confirm_index(&buttons, &self.profile) {
                Some(index) => {
                    let button = ElementRef::nth(&sel.dialog_buttons, index);
                    debug!(%button, "Confirming start over");
                    self.page.click(&button).await?;
                }
                None => debug!(offered = buttons.len(), "Dialog has no start-over button"),
            },
            None => debug!("No confirmation dialog appeared"),
        }

        let existing = sel.existing_image.as_str();
        let cleared = poll_until(timings.reset_clear_poll, move || async move {
            let left = page.count(None, existing).await?;
            Ok::<_, PageError>((left == 0).then_some(()))
        })
        .await?;

        pause(timings.reset_settle_ms).await;

        Ok(match cleared {
            Some(()) => PhaseOutcome::Completed,
            None => PhaseOutcome::Degraded("existing image still present".into()),
        })
    }

    async fn primary_upload(&self, source: &str) -> Result<PhaseOutcome, RunError> {
        let sel = &self.profile.selectors;
        let payload = self.payloads.resolve(source).await?;
        info!(mime = %payload.mime, bytes = payload.bytes.len(), "Uploading primary image");

        // The editor wires up either the file input or the drop zone depending
        // on its build, so both get the file.
        let mut missing = Vec::new();

        let populated = if self.page.count(None, &sel.file_input).await? > 0 {
            tolerate_missing(
                self.page
                    .set_input_files(&ElementRef::first(&sel.file_input), &payload)
                    .await,
            )?
        } else {
            false
        };
        if !populated {
            missing.push("file input");
        }

        let dropped = if self.page.count(None, &sel.drop_target).await? > 0 {
            tolerate_missing(
                self.page
                    .drop_files(&ElementRef::first(&sel.drop_target), &payload)
                    .await,
            )?
        } else {
            false
        };
        if !dropped {
            missing.push("drop target");
        }

        Ok(if missing.is_empty() {
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Degraded(format!("not found: {}", missing.join(", ")))
        })
    }

    async fn configure_layout(self, secondary: Option<String>) -> RunReport {
        let mut report = RunReport::default();
        let result = self.layout_configuration(secondary.as_deref(), &mut report).await;
        let outcome = settle(Phase::LayoutConfiguration, result);
        report.record(Phase::LayoutConfiguration, outcome);
        report
    }

    async fn layout_configuration(
        &self,
        secondary: Option<&str>,
        report: &mut RunReport,
    ) -> Result<PhaseOutcome, RunError> {
        let labels = &self.profile.labels;
        let timings = &self.profile.timings;
        let mut missing = Vec::new();

        pause(timings.layout_render_ms).await;

        if self.activate_tab(&labels.frame_tab).await? {
            pause(timings.tab_switch_ms).await;
        } else {
            missing.push(format!("{} tab", labels.frame_tab));
        }

        if !self.choose_aspect_ratio().await? {
            missing.push(format!("{} aspect ratio", labels.aspect_ratio));
        }

        if let Some(source) = secondary {
            let outcome = settle(Phase::TwoPanelSetup, self.two_panel_setup(source).await);
            let stop = outcome.clone();
            report.record(Phase::TwoPanelSetup, outcome);
            if let PhaseOutcome::Aborted(why) = stop {
                return Ok(PhaseOutcome::Aborted(format!("two-panel setup: {why}")));
            }
        }

        if !self.activate_tab(&labels.mockup_tab).await? {
            missing.push(format!("{} tab", labels.mockup_tab));
        }

        Ok(if missing.is_empty() {
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Degraded(format!("not found: {}", missing.join(", ")))
        })
    }

    /// Click the tab whose text is exactly `label`.
    async fn activate_tab(&self, label: &str) -> Result<bool, RunError> {
        let selector = &self.profile.selectors.tab_labels;
        let tabs = self.page.query(None, selector).await?;
        let Some(index) = tabs.iter().position(|t| t.text.trim() == label) else {
            debug!(label, "Tab not found");
            return Ok(false);
        };
        Ok(tolerate_missing(self.page.click(&ElementRef::nth(selector, index)).await)?)
    }

    async fn choose_aspect_ratio(&self) -> Result<bool, RunError> {
        let sel = &self.profile.selectors;
        let timings = &self.profile.timings;
        let wanted = self.profile.labels.aspect_ratio.as_str();

        if self.page.count(None, &sel.aspect_ratio_trigger).await? == 0 {
            debug!("Aspect ratio control not found");
            return Ok(false);
        }
        if !tolerate_missing(
            self.page
                .click(&ElementRef::first(&sel.aspect_ratio_trigger))
                .await,
        )? {
            return Ok(false);
        }
        pause(timings.aspect_open_ms).await;

        let options = self.page.query(None, &sel.aspect_ratio_options).await?;
        let Some(index) = options.iter().position(|o| o.text.trim() == wanted) else {
            debug!(wanted, offered = options.len(), "Aspect ratio option not found");
            return Ok(false);
        };
        let chosen = tolerate_missing(
            self.page
                .click(&ElementRef::nth(&sel.aspect_ratio_options, index))
                .await,
        )?;
        pause(timings.aspect_select_ms).await;
        Ok(chosen)
    }

    async fn two_panel_setup(&self, source: &str) -> Result<PhaseOutcome, RunError> {
        let sel = &self.profile.selectors;
        let timings = &self.profile.timings;
        let payload = self.payloads.resolve(source).await?;

        if self.page.count(None, &sel.layout_mode_switches).await? >= 2 {
            self.page
                .pointer_click(&ElementRef::nth(&sel.layout_mode_switches, 1))
                .await?;
            pause(timings.layout_mode_ms).await;
        } else {
            debug!("Fewer than two layout modes, keeping the current one");
        }

        let templates = self.page.count(None, &sel.layout_templates).await?;
        if templates > 0 {
            let template = ElementRef::nth(&sel.layout_templates, if templates >= 2 { 1 } else { 0 });
            self.page.scroll_into_view(&template).await?;
            pause(timings.template_scroll_ms).await;
            self.page.pointer_click(&template).await?;
            pause(timings.template_click_ms).await;
            pause(timings.template_settle_ms).await;
        } else {
            debug!("No layout templates offered");
        }

        let Some(slot) = self.empty_slot().await? else {
            return Ok(PhaseOutcome::Degraded("no empty drop slot".into()));
        };
        info!(%slot, mime = %payload.mime, "Filling second panel");

        if self.page.count(Some(&slot), &sel.slot_file_input).await? > 0 {
            self.page
                .set_input_files(&slot.child(&sel.slot_file_input, 0), &payload)
                .await?;
        } else if self.page.count(Some(&slot), &sel.slot_drop_zone).await? > 0 {
            self.page
                .drop_files(&slot.child(&sel.slot_drop_zone, 0), &payload)
                .await?;
        } else {
            return Ok(PhaseOutcome::Degraded(
                "drop slot exposes no upload target".into(),
            ));
        }
        pause(timings.slot_upload_ms).await;
        Ok(PhaseOutcome::Completed)
    }

    /// First slot in the single-display container that shows its placeholder
    /// and holds no image yet.
    async fn empty_slot(&self) -> Result<Option<ElementRef>, PageError> {
        let sel = &self.profile.selectors;
        if self.page.count(None, &sel.single_display).await? == 0 {
            return Ok(None);
        }
        let container = ElementRef::first(&sel.single_display);
        let slots = self.page.count(Some(&container), &sel.drop_slot).await?;
        for index in 0..slots {
            let slot = container.child(&sel.drop_slot, index);
            let placeholder = self.page.count(Some(&slot), &sel.slot_placeholder).await? > 0;
            let filled = self.page.count(Some(&slot), &sel.slot_image).await? > 0;
            if placeholder && !filled {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }
}

/// Dialog button that confirms starting over: labelled "Start Over" or
/// styled as the primary action.
fn confirm_index(buttons: &[ElementInfo], profile: &Profile) -> Option<usize> {
    buttons.iter().position(|b| {
        b.text.contains(profile.labels.start_over.as_str())
            || b.has_class(&profile.selectors.primary_action_class)
    })
}
