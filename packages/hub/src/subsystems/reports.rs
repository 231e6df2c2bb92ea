pub mod cron_queue;
pub mod error;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use error::{ReportError, ScheduleError};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use utils::context::AppContext;
use utils::telemetry::ReportMetrics;
use utoipa::ToSchema;
use vertex_types::{
    Channel, Event, ExecutionId, ExecutionStatus, OutputFormat, OwnerId, Priority, Report,
    ReportExecution, ReportId, ReportSchedule, ReportTemplate, ReportTemplateId,
};

use crate::config::Config;
use crate::stores::Stores;
use crate::subsystems::events::EventBroker;
use crate::subsystems::notifications::{template, NewTemplate, NotificationManager, SendNotification};
use cron_queue::CronQueue;

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewReportTemplate {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub supported_formats: Vec<OutputFormat>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewReport {
    pub template_id: ReportTemplateId,
    pub name: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub schedule: Option<ReportSchedule>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Deserialize, Clone, Debug, Default, ToSchema)]
pub struct ReportPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub schedule: Option<Option<ReportSchedule>>,
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Name of the per-owner template used for completion notifications.
const COMPLETION_TEMPLATE: &str = "report-completed";

/// Cron-driven report generation. A single ticker finds due reports;
/// executions run on a capped worker pool with at-most-one in flight per
/// report, produce an artifact file, and fan out completion
/// notifications and lifecycle events.
#[derive(Clone)]
pub struct ReportScheduler {
    stores: Stores,
    notifications: NotificationManager,
    broker: Arc<EventBroker>,
    queue: Arc<CronQueue>,
    in_flight: Arc<DashMap<ReportId, ExecutionId>>,
    exec_tokens: Arc<DashMap<ExecutionId, CancellationToken>>,
    worker_slots: Arc<tokio::sync::Semaphore>,
    shutdown: CancellationToken,
    output_dir: PathBuf,
    tick_interval: Duration,
    grace: Duration,
    metrics: ReportMetrics,
}

impl ReportScheduler {
    pub fn new(
        config: &Config,
        stores: Stores,
        notifications: NotificationManager,
        broker: Arc<EventBroker>,
        metrics: ReportMetrics,
    ) -> Self {
        Self {
            stores,
            notifications,
            broker,
            queue: Arc::new(CronQueue::new()),
            in_flight: Arc::new(DashMap::new()),
            exec_tokens: Arc::new(DashMap::new()),
            worker_slots: Arc::new(tokio::sync::Semaphore::new(config.reports.workers.max(1))),
            shutdown: CancellationToken::new(),
            output_dir: config.report_output_dir(),
            tick_interval: Duration::from_secs(config.reports.tick_secs.max(1)),
            grace: Duration::from_secs(config.reports.shutdown_grace_secs),
            metrics,
        }
    }

    /// Loads existing schedules and starts the tick loop.
    #[instrument(skip(self, ctx), fields(subsys = "Reports"))]
    pub fn start(&self, ctx: AppContext) {
        match self.stores.list_reports() {
            Ok(reports) => {
                for report in reports {
                    if !report.active {
                        continue;
                    }
                    if let Some(schedule) = &report.schedule {
                        if let Err(err) =
                            self.queue.add(report.id, &schedule.cron, &schedule.timezone)
                        {
                            tracing::error!(
                                "Stored schedule for report {} no longer parses: {:?}",
                                report.id,
                                err
                            );
                        }
                    }
                }
                tracing::info!("Report scheduler loaded {} schedules", self.queue.len());
            }
            Err(err) => tracing::error!("Failed to load report schedules: {:?}", err),
        }

        let _self = self.clone();
        let mut kill_receiver = ctx.get_kill_receiver();
        let rt = ctx.rt.clone();

        ctx.rt.spawn(async move {
            let mut interval = tokio::time::interval(_self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = kill_receiver.recv() => {
                        _self.drain_on_shutdown().await;
                        break;
                    }
                    _ = interval.tick() => {
                        let due = _self.queue.process_due(Utc::now());
                        for report_id in due {
                            _self.spawn_execution(&rt, report_id);
                        }
                    }
                }
            }
        });
    }

    /// Gives in-flight executions the grace period, then interrupts
    /// whatever is left and marks it cancelled.
    async fn drain_on_shutdown(&self) {
        if self.in_flight.is_empty() {
            return;
        }

        tracing::info!(
            "Report scheduler stopping; {} executions get {:?} to finish",
            self.in_flight.len(),
            self.grace
        );
        let deadline = Instant::now() + self.grace;
        while !self.in_flight.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.shutdown.cancel();

        match self.stores.running_executions() {
            Ok(still_running) => {
                for execution in still_running {
                    let result = self.stores.update_execution(&execution.id, |e| {
                        e.status = ExecutionStatus::Cancelled;
                        e.ended_at = Some(Utc::now());
                    });
                    if result.is_ok() {
                        tracing::warn!(
                            "Execution {} cancelled at shutdown",
                            execution.id
                        );
                    }
                }
            }
            Err(err) => tracing::error!("Failed to sweep running executions: {:?}", err),
        }
    }

    /// Schedules one execution unless the report already has one in
    /// flight; overlapping ticks are skipped, not queued.
    fn spawn_execution(&self, rt: &tokio::runtime::Runtime, report_id: ReportId) -> Option<ExecutionId> {
        let execution = match self.in_flight.entry(report_id) {
            Entry::Occupied(_) => {
                self.metrics.executions_skipped.add(1, &[]);
                tracing::info!(
                    "Report {} still has an execution in flight, skipping this fire",
                    report_id
                );
                return None;
            }
            Entry::Vacant(entry) => {
                let execution = ReportExecution::start(report_id);
                entry.insert(execution.id);
                execution
            }
        };

        let execution_id = execution.id;
        let token = self.shutdown.child_token();
        self.exec_tokens.insert(execution_id, token.clone());

        let _self = self.clone();
        rt.spawn(async move {
            let _permit = match _self.worker_slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            _self.metrics.executions_started.add(1, &[]);
            if let Err(err) = _self.stores.save_execution(&execution) {
                tracing::error!("Failed to record execution {}: {:?}", execution_id, err);
            }

            let started = Instant::now();
            tokio::select! {
                _ = token.cancelled() => {
                    // interrupted; the record may already be cancelled by
                    // the shutdown sweep or an explicit cancel
                    let _ = _self.stores.update_execution(&execution_id, |e| {
                        e.status = ExecutionStatus::Cancelled;
                        e.ended_at = Some(Utc::now());
                    });
                    tracing::warn!("Execution {} interrupted", execution_id);
                }
                result = _self.run_execution(report_id, execution_id) => {
                    _self.metrics
                        .execution_duration
                        .record(started.elapsed().as_secs_f64(), &[]);
                    if let Err(err) = result {
                        _self.fail_execution(report_id, execution_id, &err.to_string()).await;
                    }
                }
            }

            _self.exec_tokens.remove(&execution_id);
            _self.in_flight.remove(&report_id);
        });

        Some(execution_id)
    }

    /// The generation pipeline: render the template, write the artifact,
    /// finalize the records, notify, and publish the lifecycle event.
    async fn run_execution(
        &self,
        report_id: ReportId,
        execution_id: ExecutionId,
    ) -> Result<(), ReportError> {
        let report = self.stores.get_report(&report_id)?;
        if !report.active {
            return Err(ReportError::Validation("report is deactivated".into()));
        }
        let report_template = self.stores.get_report_template(&report.template_id)?;

        let mut params = report.params.clone();
        params.insert("report".to_string(), report.name.clone());
        params.insert("generated_at".to_string(), Utc::now().to_rfc3339());

        let rendered = template::render(
            &report_template.content,
            &params,
            &report_template.required_params,
        )
        .map_err(|e| ReportError::Validation(e.to_string()))?;

        let body = match report.format {
            OutputFormat::Json => {
                let envelope = json!({
                    "report": report.name.clone(),
                    "generated_at": params["generated_at"].clone(),
                    "content": rendered,
                });
                serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
            }
            _ => rendered,
        };

        let dir = self.output_dir.join(report_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.{}", execution_id, report.format.extension()));
        tokio::fs::write(&path, body.as_bytes()).await?;

        let bytes = body.len() as u64;
        let path_str = path.to_string_lossy().to_string();

        self.stores.update_execution(&execution_id, |e| {
            e.status = ExecutionStatus::Completed;
            e.ended_at = Some(Utc::now());
            e.output_path = Some(path_str.clone());
            e.bytes = bytes;
        })?;
        self.stores.update_report(&report_id, |r| {
            r.last_generated = Some(Utc::now());
        })?;

        self.metrics.executions_completed.add(1, &[]);
        self.metrics.artifact_bytes.record(bytes, &[]);
        tracing::info!(
            "Report {} generated: execution={}, path={}, bytes={}",
            report.name,
            execution_id,
            path_str,
            bytes
        );

        if !report.recipients.is_empty() {
            if let Err(err) = self.notify_completion(&report, &path_str) {
                // the artifact exists; a notification problem shouldn't
                // fail the execution
                tracing::warn!(
                    "Completion notification for report {} failed: {:?}",
                    report.id,
                    err
                );
            }
        }

        self.broker
            .publish(Event::new(
                "report.completed",
                "hub.reports",
                json!({
                    "report_id": report_id.to_string(),
                    "execution_id": execution_id.to_string(),
                    "output_path": path_str,
                    "bytes": bytes,
                }),
            ))
            .await;

        Ok(())
    }

    async fn fail_execution(&self, report_id: ReportId, execution_id: ExecutionId, error: &str) {
        self.metrics.executions_failed.add(1, &[]);
        let result = self.stores.update_execution(&execution_id, |e| {
            e.status = ExecutionStatus::Failed;
            e.ended_at = Some(Utc::now());
            e.error = Some(error.to_string());
        });
        if let Err(err) = result {
            tracing::error!("Failed to finalize execution {}: {:?}", execution_id, err);
        }

        tracing::error!("Report {} execution failed: {}", report_id, error);
        self.broker
            .publish(Event::new(
                "report.failed",
                "hub.reports",
                json!({
                    "report_id": report_id.to_string(),
                    "execution_id": execution_id.to_string(),
                    "error": error,
                }),
            ))
            .await;
    }

    fn notify_completion(&self, report: &Report, path: &str) -> Result<(), ReportError> {
        let template_id = match self
            .stores
            .find_template_by_name(&report.owner, COMPLETION_TEMPLATE)?
        {
            Some(template) => template.id,
            None => {
                self.notifications
                    .create_template(
                        &report.owner,
                        NewTemplate {
                            name: COMPLETION_TEMPLATE.to_string(),
                            channel: Channel::Email,
                            subject: Some("Report {{report}} is ready".to_string()),
                            body: "Report {{report}} finished generating.\nArtifact: {{path}}"
                                .to_string(),
                            required_params: vec!["report".to_string(), "path".to_string()],
                            category: Some("system".to_string()),
                        },
                    )?
                    .id
            }
        };

        self.notifications.send(
            &report.owner,
            SendNotification {
                template_id,
                recipients: report.recipients.clone(),
                params: [
                    ("report".to_string(), report.name.clone()),
                    ("path".to_string(), path.to_string()),
                ]
                .into_iter()
                .collect(),
                priority: Priority::Normal,
                scheduled_at: None,
            },
        )?;
        Ok(())
    }

    // ---- report templates ----

    #[instrument(skip(self, new), fields(subsys = "Reports"))]
    pub fn create_report_template(
        &self,
        owner: &OwnerId,
        new: NewReportTemplate,
    ) -> Result<ReportTemplate, ReportError> {
        if new.name.trim().is_empty() {
            return Err(ReportError::Validation("name must not be empty".into()));
        }
        let declared = template::placeholders(&new.content)
            .map_err(|e| ReportError::Validation(e.to_string()))?;
        for required in &new.required_params {
            if !declared.contains(required) {
                return Err(ReportError::Validation(format!(
                    "required param {} does not appear in the template",
                    required
                )));
            }
        }

        let now = Utc::now();
        let template = ReportTemplate {
            id: ReportTemplateId::generate(),
            owner: owner.clone(),
            name: new.name,
            content: new.content,
            required_params: new.required_params,
            supported_formats: new.supported_formats,
            category: new.category,
            created_at: now,
            updated_at: now,
        };
        self.stores.save_report_template(&template)?;
        Ok(template)
    }

    pub fn get_report_template(
        &self,
        id: &ReportTemplateId,
    ) -> Result<ReportTemplate, ReportError> {
        Ok(self.stores.get_report_template(id)?)
    }

    #[instrument(skip(self), fields(subsys = "Reports"))]
    pub fn delete_report_template(
        &self,
        id: &ReportTemplateId,
    ) -> Result<ReportTemplate, ReportError> {
        Ok(self.stores.remove_report_template(id)?)
    }

    // ---- reports ----

    #[instrument(skip(self, new), fields(subsys = "Reports"))]
    pub fn create_report(&self, owner: &OwnerId, new: NewReport) -> Result<Report, ReportError> {
        if new.name.trim().is_empty() {
            return Err(ReportError::Validation("name must not be empty".into()));
        }
        let template = self.stores.get_report_template(&new.template_id)?;
        if !template.supported_formats.is_empty()
            && !template.supported_formats.contains(&new.format)
        {
            return Err(ReportError::Validation(format!(
                "template {} does not support format {:?}",
                template.name, new.format
            )));
        }
        if let Some(schedule) = &new.schedule {
            cron_queue::parse_schedule(&schedule.cron, &schedule.timezone)?;
        }

        let now = Utc::now();
        let report = Report {
            id: ReportId::generate(),
            owner: owner.clone(),
            template_id: new.template_id,
            name: new.name,
            params: new.params,
            schedule: new.schedule,
            recipients: new.recipients,
            format: new.format,
            active: true,
            last_generated: None,
            created_at: now,
            updated_at: now,
        };
        self.stores.save_report(&report)?;

        if let Some(schedule) = &report.schedule {
            let first = self
                .queue
                .add(report.id, &schedule.cron, &schedule.timezone)?;
            tracing::info!(
                "Report {} scheduled, first fire at {}",
                report.id,
                first.to_rfc3339()
            );
        }

        Ok(report)
    }

    #[instrument(skip(self, patch), fields(subsys = "Reports"))]
    pub fn update_report(
        &self,
        id: &ReportId,
        patch: ReportPatch,
    ) -> Result<Report, ReportError> {
        if let Some(Some(schedule)) = &patch.schedule {
            cron_queue::parse_schedule(&schedule.cron, &schedule.timezone)?;
        }

        let updated = self.stores.update_report(id, |report| {
            if let Some(name) = patch.name {
                report.name = name;
            }
            if let Some(params) = patch.params {
                report.params = params;
            }
            if let Some(schedule) = patch.schedule {
                report.schedule = schedule;
            }
            if let Some(recipients) = patch.recipients {
                report.recipients = recipients;
            }
            if let Some(format) = patch.format {
                report.format = format;
            }
            if let Some(active) = patch.active {
                report.active = active;
            }
        })?;

        // re-register against the fresh schedule state
        self.queue.remove(id);
        if updated.active {
            if let Some(schedule) = &updated.schedule {
                self.queue.add(updated.id, &schedule.cron, &schedule.timezone)?;
            }
        }

        Ok(updated)
    }

    #[instrument(skip(self), fields(subsys = "Reports"))]
    pub fn delete_report(&self, id: &ReportId) -> Result<Report, ReportError> {
        let removed = self.stores.remove_report(id)?;
        self.queue.remove(id);
        Ok(removed)
    }

    pub fn get_report(&self, id: &ReportId) -> Result<Report, ReportError> {
        Ok(self.stores.get_report(id)?)
    }

    pub fn list_reports(&self) -> Result<Vec<Report>, ReportError> {
        Ok(self.stores.list_reports()?)
    }

    // ---- executions ----

    /// Manual trigger outside the cron cadence. Returns None when the
    /// report already has an execution in flight.
    pub fn run_now(&self, ctx: &AppContext, id: &ReportId) -> Result<Option<ExecutionId>, ReportError> {
        // surface not-found before spawning anything
        self.stores.get_report(id)?;
        Ok(self.spawn_execution(&ctx.rt, *id))
    }

    pub fn executions(&self, id: &ReportId) -> Result<Vec<ReportExecution>, ReportError> {
        Ok(self.stores.executions_for_report(id)?)
    }

    pub fn get_execution(&self, id: &ExecutionId) -> Result<ReportExecution, ReportError> {
        Ok(self.stores.get_execution(id)?)
    }

    /// Explicit cancel: interrupts the worker and finalizes the record.
    #[instrument(skip(self), fields(subsys = "Reports"))]
    pub fn cancel_execution(&self, id: &ExecutionId) -> Result<ReportExecution, ReportError> {
        if let Some(token) = self.exec_tokens.get(id) {
            token.cancel();
        }

        self.stores
            .update_execution(id, |e| {
                e.status = ExecutionStatus::Cancelled;
                e.ended_at = Some(Utc::now());
            })
            .map_err(|err| match err {
                crate::stores::StoreError::TerminalExecution(id, _) => {
                    ReportError::TerminalExecution(id)
                }
                other => ReportError::Store(other),
            })
    }

    pub fn scheduled_count(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::storage::db::HubDb;
    use utils::telemetry::{EventMetrics, NotificationMetrics, WebhookMetrics};

    use crate::subsystems::notifications::NotificationManager;
    use crate::subsystems::webhooks::WebhookManager;

    fn scheduler_with(config: Config) -> ReportScheduler {
        let stores = Stores::new(HubDb::new());
        let meter = opentelemetry::global::meter("test");
        let webhooks = WebhookManager::new(&config, stores.clone(), WebhookMetrics::init(&meter));
        let broker = Arc::new(EventBroker::new(
            &config,
            stores.clone(),
            webhooks,
            EventMetrics::init(&meter),
        ));
        let notifications = NotificationManager::new(
            &config,
            stores.clone(),
            broker.clone(),
            NotificationMetrics::init(&meter),
        );
        ReportScheduler::new(
            &config,
            stores,
            notifications,
            broker,
            ReportMetrics::init(&meter),
        )
    }

    fn scheduler() -> ReportScheduler {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data = dir.keep();
        scheduler_with(config)
    }

    fn sample_template(scheduler: &ReportScheduler, owner: &OwnerId) -> ReportTemplate {
        scheduler
            .create_report_template(
                owner,
                NewReportTemplate {
                    name: "usage".to_string(),
                    content: "Usage for {{period}}: all good".to_string(),
                    required_params: vec!["period".to_string()],
                    supported_formats: vec![OutputFormat::Json, OutputFormat::Html],
                    category: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn create_report_validates_schedule_and_format() {
        let scheduler = scheduler();
        let owner = OwnerId::new("alice").unwrap();
        let template = sample_template(&scheduler, &owner);

        let bad_cron = scheduler.create_report(
            &owner,
            NewReport {
                template_id: template.id,
                name: "r1".to_string(),
                params: Default::default(),
                schedule: Some(ReportSchedule {
                    cron: "every tuesday".to_string(),
                    timezone: "UTC".to_string(),
                }),
                recipients: vec![],
                format: OutputFormat::Json,
            },
        );
        assert!(matches!(bad_cron, Err(ReportError::Schedule(_))));

        let bad_format = scheduler.create_report(
            &owner,
            NewReport {
                template_id: template.id,
                name: "r2".to_string(),
                params: Default::default(),
                schedule: None,
                recipients: vec![],
                format: OutputFormat::Pdf,
            },
        );
        assert!(matches!(bad_format, Err(ReportError::Validation(_))));

        let ok = scheduler
            .create_report(
                &owner,
                NewReport {
                    template_id: template.id,
                    name: "r3".to_string(),
                    params: Default::default(),
                    schedule: Some(ReportSchedule {
                        cron: "0 */5 * * * *".to_string(),
                        timezone: "UTC".to_string(),
                    }),
                    recipients: vec![],
                    format: OutputFormat::Json,
                },
            )
            .unwrap();
        assert!(scheduler.queue.contains(&ok.id));
    }

    #[test]
    fn deactivating_unschedules() {
        let scheduler = scheduler();
        let owner = OwnerId::new("alice").unwrap();
        let template = sample_template(&scheduler, &owner);

        let report = scheduler
            .create_report(
                &owner,
                NewReport {
                    template_id: template.id,
                    name: "r".to_string(),
                    params: Default::default(),
                    schedule: Some(ReportSchedule {
                        cron: "0 0 * * * *".to_string(),
                        timezone: "UTC".to_string(),
                    }),
                    recipients: vec![],
                    format: OutputFormat::Json,
                },
            )
            .unwrap();
        assert_eq!(scheduler.scheduled_count(), 1);

        scheduler
            .update_report(
                &report.id,
                ReportPatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn execution_writes_artifact_and_updates_report() {
        let scheduler = scheduler();
        let owner = OwnerId::new("alice").unwrap();
        let template = sample_template(&scheduler, &owner);

        let report = scheduler
            .create_report(
                &owner,
                NewReport {
                    template_id: template.id,
                    name: "monthly".to_string(),
                    params: [("period".to_string(), "2024-06".to_string())]
                        .into_iter()
                        .collect(),
                    schedule: None,
                    recipients: vec![],
                    format: OutputFormat::Html,
                },
            )
            .unwrap();

        let execution = ReportExecution::start(report.id);
        scheduler.stores.save_execution(&execution).unwrap();
        scheduler
            .run_execution(report.id, execution.id)
            .await
            .unwrap();

        let finished = scheduler.get_execution(&execution.id).unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        let path = finished.output_path.clone().unwrap();
        assert!(path.ends_with(".html"));
        assert!(finished.bytes > 0);
        assert!(finished.ended_at.unwrap() >= finished.started_at);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Usage for 2024-06"));

        let report = scheduler.get_report(&report.id).unwrap();
        assert!(report.last_generated.is_some());
    }

    #[tokio::test]
    async fn missing_required_param_fails_execution() {
        let scheduler = scheduler();
        let owner = OwnerId::new("alice").unwrap();
        let template = sample_template(&scheduler, &owner);

        let report = scheduler
            .create_report(
                &owner,
                NewReport {
                    template_id: template.id,
                    name: "broken".to_string(),
                    params: Default::default(),
                    schedule: None,
                    recipients: vec![],
                    format: OutputFormat::Json,
                },
            )
            .unwrap();

        let execution = ReportExecution::start(report.id);
        scheduler.stores.save_execution(&execution).unwrap();
        let result = scheduler.run_execution(report.id, execution.id).await;
        assert!(result.is_err());
    }

    #[test]
    fn in_flight_guard_skips_overlapping_fires() {
        let ctx = AppContext::new();
        let scheduler = scheduler();
        let owner = OwnerId::new("alice").unwrap();
        let template = sample_template(&scheduler, &owner);

        let report = scheduler
            .create_report(
                &owner,
                NewReport {
                    template_id: template.id,
                    name: "guarded".to_string(),
                    params: [("period".to_string(), "q1".to_string())].into_iter().collect(),
                    schedule: None,
                    recipients: vec![],
                    format: OutputFormat::Json,
                },
            )
            .unwrap();

        // simulate an execution already in flight
        scheduler
            .in_flight
            .insert(report.id, ExecutionId::generate());

        let skipped = scheduler.run_now(&ctx, &report.id).unwrap();
        assert!(skipped.is_none());

        scheduler.in_flight.remove(&report.id);
        ctx.kill();
    }
}
