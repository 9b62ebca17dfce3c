use crate::actions::{Action, ActionDispatcher, ActionOutcome};
use crate::config::Rule;
use crate::error::{RuleError, StoreError, ValidationWarning};
use crate::labels::LabelCache;
use crate::mail_service::MailService;
use crate::predicate::PredicateCompiler;
use crate::query::QueryExecutor;
use crate::store::{RecordStore, StoreSession};

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    pub dry_run: bool,
}

/// How one rule fared.
#[derive(Debug)]
pub struct RuleReport {
    pub rule: String,
    pub matched: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: Vec<ValidationWarning>,
    /// Set when the rule could not be evaluated at all.
    pub error: Option<RuleError>,
}

impl RuleReport {
    fn new(rule: &Rule) -> Self {
        Self {
            rule: rule.label(),
            matched: 0,
            applied: 0,
            skipped: 0,
            failed: 0,
            warnings: Vec::new(),
            error: None,
        }
    }

    fn record(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Applied => self.applied += 1,
            ActionOutcome::Skipped(_) => self.skipped += 1,
            ActionOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Everything one `process_rules` call did, in rule order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub rules: Vec<RuleReport>,
}

impl RunReport {
    pub fn matched(&self) -> usize {
        self.rules.iter().map(|r| r.matched).sum()
    }

    pub fn applied(&self) -> usize {
        self.rules.iter().map(|r| r.applied).sum()
    }

    pub fn skipped(&self) -> usize {
        self.rules.iter().map(|r| r.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.rules.iter().map(|r| r.failed).sum()
    }

    /// Rules that could not be evaluated.
    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleReport> {
        self.rules.iter().filter(|r| r.error.is_some())
    }
}

/// Batch rule processor for one mailbox.
///
/// Rules, their matched records and each record's actions are handled
/// strictly in order. The label catalog is fetched once at construction and
/// belongs to this engine alone; concurrent runs need their own engines.
pub struct RuleEngine<S> {
    service: S,
    labels: LabelCache,
    compiler: PredicateCompiler,
    options: EngineOptions,
}

impl<S: MailService> RuleEngine<S> {
    pub async fn new(service: S, options: EngineOptions) -> Self {
        let labels = LabelCache::load(&service).await;
        Self {
            service,
            labels,
            compiler: PredicateCompiler::new(),
            options,
        }
    }

    /// Replace the predicate compiler, e.g. one with a pinned clock.
    pub fn with_compiler(mut self, compiler: PredicateCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn labels(&self) -> &LabelCache {
        &self.labels
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Run every rule against the store.
    ///
    /// A rule whose predicate cannot be built or whose query fails is
    /// recorded in its [`RuleReport`] and the remaining rules still run.
    /// Only failing to open the store session aborts the whole run.
    pub async fn process_rules(
        &self,
        store: &dyn RecordStore,
        rules: &[Rule],
    ) -> Result<RunReport, StoreError> {
        let mut session = store.open_session()?;
        let mut report = RunReport::default();

        for rule in rules {
            log::info!("Processing Rule {}", rule.label());
            let mut rule_report = RuleReport::new(rule);
            if let Err(e) = self
                .process_rule(session.as_mut(), rule, &mut rule_report)
                .await
            {
                log::error!("Rule {} aborted: {e}", rule_report.rule);
                rule_report.error = Some(e);
            }
            report.rules.push(rule_report);
        }

        log::info!(
            "Processed {} rule(s): {} match(es), {} action(s) applied, {} skipped, {} failed",
            report.rules.len(),
            report.matched(),
            report.applied(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    async fn process_rule(
        &self,
        session: &mut dyn StoreSession,
        rule: &Rule,
        report: &mut RuleReport,
    ) -> Result<(), RuleError> {
        let compiled = self.compiler.compile(rule)?;
        report.warnings.extend(compiled.warnings);

        let emails = QueryExecutor::execute(session, &compiled.predicate)?;
        report.matched = emails.len();

        let mut actions = Vec::with_capacity(rule.actions.len());
        for (index, spec) in rule.actions.iter().enumerate() {
            match Action::resolve(index, spec) {
                Ok(action) => actions.push(action),
                Err(warning) => {
                    log::warn!("Rule {}: skipping {warning}", report.rule);
                    report.warnings.push(warning);
                }
            }
        }

        let dispatcher = ActionDispatcher::new(&self.service, &self.labels, self.options.dry_run);
        for email in &emails {
            for action in &actions {
                let outcome = dispatcher.apply(email, action).await;
                report.record(&outcome);
            }
        }
        Ok(())
    }
}
