//! Fatal errors, diagnostics and telemetry

use super::{Effects, Model, QueueEngine};
use crate::diagnostics::{Classification, first_sentence, generate_report_id};
use crate::error::{Error, Result};
use crate::notify::NotificationParams;
use crate::types::{
    Diagnostic, Event, Fatal, GroupId, ItemId, LifecycleState, NotificationKind,
};
use chrono::Utc;

/// Code of fatals raised by the engine itself rather than the tool
pub const INTERNAL_CODE: &str = "Internal error";

/// Fatal for a failure of the orchestration layer (spawn failure, stall, bad metadata)
pub(crate) fn internal_fatal(message: impl Into<String>) -> Fatal {
    let message = message.into();
    Fatal {
        code: INTERNAL_CODE.to_string(),
        short_message: first_sentence(&message),
        raw: message.clone(),
        message,
        exit_code: None,
        internal: true,
        unexpected: true,
        report_id: Some(generate_report_id()),
        timestamp: Utc::now(),
    }
}

/// Fatal for a tool that failed without printing anything recognisable
pub(crate) fn silent_failure(raw: &str, exit_code: Option<i32>) -> Fatal {
    let message = match exit_code {
        Some(code) => format!("The tool exited with code {code}."),
        None => "The tool was terminated by a signal.".to_string(),
    };
    Fatal {
        code: crate::diagnostics::UNHANDLED_CODE.to_string(),
        short_message: first_sentence(&message),
        message,
        raw: raw.to_string(),
        exit_code,
        internal: false,
        unexpected: true,
        report_id: Some(generate_report_id()),
        timestamp: Utc::now(),
    }
}

impl Model {
    /// Record a fatal for `item_id` and move it (and a non-combined group) to `error`
    pub(crate) fn apply_fatal(
        &mut self,
        group_id: GroupId,
        item_id: ItemId,
        fatal: Fatal,
        fx: &mut Effects,
    ) {
        let Some(group) = self.store.find_group_mut(group_id) else {
            tracing::debug!(group_id = %group_id, code = %fatal.code, "Dropping fatal for deleted group");
            return;
        };
        let Some(item) = group.item(item_id) else {
            return;
        };
        if item.is_descriptor() && !fatal.internal {
            tracing::debug!(group_id = %group_id, code = %fatal.code, "Ignoring tool error on playlist descriptor");
            return;
        }
        if self.states.state(item_id) == Some(LifecycleState::Error) {
            return;
        }

        let url = item.url.clone();
        let title = item.title.clone().or_else(|| group.title.clone());
        let combined = group.is_combined;
        group.errored += 1;

        tracing::warn!(
            group_id = %group_id,
            item_id = %item_id,
            code = %fatal.code,
            internal = fatal.internal,
            "Item failed"
        );

        if fatal.unexpected {
            let context = serde_json::json!({
                "url": url,
                "group_id": group_id,
                "item_id": item_id,
                "options": self.options.get(&group_id),
                "exit_code": fatal.exit_code,
                "report_id": fatal.report_id,
                "raw": fatal.raw,
            });
            fx.report(&fatal.code, &fatal.message, context);
        }

        if combined {
            self.set_item_state(group_id, item_id, LifecycleState::Error, fx);
            self.settle_combined(group_id, fx);
        } else {
            self.set_group_state(group_id, LifecycleState::Error, fx);
            fx.notify(
                NotificationKind::DownloadFailed,
                NotificationParams {
                    title,
                    count: 1,
                    message: Some(fatal.short_message.clone()),
                },
            );
        }

        fx.event(Event::Fatal {
            group_id,
            item_id,
            fatal: fatal.clone(),
        });
        self.fatals.insert(item_id, fatal);
    }

    /// Close a downloading combined group whose members all ended
    ///
    /// The leader becomes `done` if any member finished, else `error`.
    fn settle_combined(&mut self, group_id: GroupId, fx: &mut Effects) {
        let Some(group) = self.store.find_group_by_id(group_id) else {
            return;
        };
        let Some(leader) = group.leader().map(|l| l.id) else {
            return;
        };
        if !self.states.state(leader).is_some_and(|s| s.is_downloading()) {
            return;
        }
        let members: Vec<Option<LifecycleState>> = group
            .items
            .iter()
            .filter(|i| !i.is_leader && !i.unavailable)
            .map(|i| self.states.state(i.id))
            .collect();
        let settled = members
            .iter()
            .all(|s| matches!(s, Some(LifecycleState::Done | LifecycleState::Error)));
        if !settled {
            return;
        }

        let done = members
            .iter()
            .filter(|s| **s == Some(LifecycleState::Done))
            .count();
        let title = group.title.clone();
        if done > 0 {
            self.set_item_state(group_id, leader, LifecycleState::Done, fx);
            fx.notify(
                NotificationKind::PlaylistFinished,
                NotificationParams {
                    title,
                    count: done,
                    message: None,
                },
            );
        } else {
            self.set_item_state(group_id, leader, LifecycleState::Error, fx);
        }
    }

    /// Record a non-terminal diagnostic for `item_id`
    pub(crate) fn record_diagnostic(
        &mut self,
        group_id: GroupId,
        item_id: ItemId,
        diagnostic: Diagnostic,
        fx: &mut Effects,
    ) {
        if self.store.find_group_by_id(group_id).is_none() {
            return;
        }
        self.diagnostics
            .entry(item_id)
            .or_default()
            .push(diagnostic.clone());
        fx.event(Event::Diagnostic {
            group_id,
            item_id,
            diagnostic,
        });
    }
}

impl QueueEngine {
    /// Apply `fatal` to an item
    pub(crate) fn fail_item(&self, group_id: GroupId, item_id: ItemId, fatal: Fatal) {
        self.with_model(|model, fx| model.apply_fatal(group_id, item_id, fatal, fx));
    }

    /// Classify output of a failed invocation and apply the result
    ///
    /// Returns `true` when a fatal was raised.
    pub(crate) fn apply_classification(
        &self,
        group_id: GroupId,
        item_id: ItemId,
        raw: &str,
        exit_code: Option<i32>,
    ) -> bool {
        match self.classifier.classify(raw, exit_code) {
            Classification::NoMatch => false,
            Classification::Informational(diagnostic) => {
                self.with_model(|model, fx| {
                    model.record_diagnostic(group_id, item_id, diagnostic, fx)
                });
                false
            }
            Classification::Suppressed { .. } => false,
            Classification::Known(fatal) | Classification::Unhandled(fatal) => {
                self.fail_item(group_id, item_id, fatal);
                true
            }
        }
    }

    /// Send the telemetry report of an item's unexpected fatal
    ///
    /// Returns the report id, which the host shows to the user.
    pub async fn report_fatal(&self, item: ItemId) -> Result<String> {
        let report_id = self
            .with_model(|model, _| model.fatals.get(&item).map(|f| f.report_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("no fatal recorded for item {item}")))?
            .ok_or_else(|| Error::NotFound(format!("fatal of item {item} has no report")))?;

        self.collaborators.telemetry.send_report(&report_id).await?;
        tracing::info!(item_id = %item, report_id = %report_id, "Fatal reported");
        Ok(report_id)
    }
}
