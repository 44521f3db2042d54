//! Deployment orchestrator.
//!
//! Walks the dependency graph with a bounded pool of concurrent provider
//! calls. A descriptor becomes eligible once every descriptor it reads from
//! is `Applied`; eligible descriptors start in declaration order whenever a
//! slot frees up.
//!
//! Failures cascade only downwards: the failing descriptor's transitive
//! dependents are marked `Failed` without a provider call, and independent
//! branches keep going. Run-fatal errors (a denied grant, a reference that
//! resolved before its producer) abort the run: in-flight calls finish and
//! descriptors that were already eligible may still start, but nothing newly
//! unlocked is scheduled.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use futures::stream::{FuturesUnordered, StreamExt};
use jiff::Timestamp;
use keel_core::{
    BoundParameters, Manifest, Mode, ParameterValues, ResourceAddr, ResourceDescriptor,
    ResourceKind,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{OutputBroker, ResolvedProperties, ResolvedValue};
use crate::config::DeploymentConfig;
use crate::error::{ProvisionerError, format_err_chain};
use crate::grant::GrantModule;
use crate::graph::DependencyGraph;
use crate::plan::Plan;
use crate::provider::{ApplyRequest, Attributes, Provider};
use crate::report::{DescriptorReport, DescriptorState, RunOutput, RunReport, RunState};
use crate::retry::retry_transient;
use crate::scope::{ResolvedScope, ScopeResolver};

pub struct Orchestrator<P> {
    provider: P,
    config: DeploymentConfig,
}

impl<P: Provider> Orchestrator<P> {
    pub fn new(provider: P, config: DeploymentConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn plan(&self, manifest: &Manifest) -> Result<Plan, ProvisionerError> {
        Plan::build(manifest)
    }

    /// See [`DeploymentConfig::bind`].
    pub fn bind(
        &self,
        manifest: &Manifest,
        supplied: &ParameterValues,
    ) -> Result<BoundParameters, ProvisionerError> {
        self.config.bind(manifest, supplied)
    }

    /// Execute one run.
    ///
    /// Configuration, manifest and cycle errors are returned before any
    /// provider call. Everything that goes wrong after that is recorded per
    /// descriptor in the returned report.
    pub async fn run(
        &self,
        manifest: &Manifest,
        params: &BoundParameters,
    ) -> Result<RunReport, ProvisionerError> {
        self.config.validate()?;
        let graph = DependencyGraph::build(manifest)?;

        let run_id = Uuid::new_v4();
        let started_at = Timestamp::now();
        info!(
            %run_id,
            resources = graph.len(),
            parallelism = self.config.parallelism,
            state = RunState::Running.as_str(),
            "run started"
        );

        let ctx = RunContext {
            manifest,
            config: &self.config,
            provider: &self.provider,
            broker: OutputBroker::new(manifest, params),
            resolver: ScopeResolver::new(self.config.primary_scope()?, params),
            grants: GrantModule::new(&self.provider, &self.config),
        };

        let n = graph.len();
        let mut records: Vec<NodeRecord> = (0..n).map(|_| NodeRecord::default()).collect();
        let mut waiting: Vec<usize> = (0..n).map(|i| graph.dependency_indices(i).len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = graph.root_indices().map(Reverse).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut abort_origin: Option<usize> = None;

        loop {
            while in_flight.len() < self.config.parallelism {
                let Some(Reverse(i)) = ready.pop() else { break };
                records[i].state = DescriptorState::Resolving;
                in_flight.push(ctx.process(i));
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };

            let i = outcome.index;
            let addr = &graph.nodes()[i];
            records[i].attempts = outcome.attempts;

            match outcome.result {
                Ok(resource_id) => {
                    info!(
                        addr = %addr,
                        state = DescriptorState::Applied.as_str(),
                        attempts = outcome.attempts,
                        "descriptor applied"
                    );
                    records[i].state = DescriptorState::Applied;
                    records[i].resource_id = Some(resource_id);

                    if abort_origin.is_some() {
                        continue;
                    }
                    for &j in graph.dependent_indices(i) {
                        waiting[j] -= 1;
                        if waiting[j] == 0 && records[j].state == DescriptorState::Pending {
                            ready.push(Reverse(j));
                        }
                    }
                }
                Err(err) => {
                    error!(
                        addr = %addr,
                        state = DescriptorState::Failed.as_str(),
                        failed_during = outcome.phase.as_str(),
                        attempts = outcome.attempts,
                        error = %ctx.broker.redactor().redact(&format_err_chain(&err)),
                        "descriptor failed"
                    );

                    if err.is_run_fatal() && abort_origin.is_none() {
                        warn!(addr = %addr, "run aborted, no further descriptors will be scheduled");
                        abort_origin = Some(i);
                    }

                    records[i].state = DescriptorState::Failed;
                    records[i].failed_during = Some(outcome.phase);
                    records[i].origin = Some(i);
                    records[i].error = Some(err);

                    for j in graph.transitive_dependent_indices(i) {
                        if records[j].state != DescriptorState::Pending {
                            continue;
                        }
                        let dependent = &graph.nodes()[j];
                        warn!(
                            addr = %dependent,
                            dependency = %addr,
                            state = DescriptorState::Failed.as_str(),
                            "skipping descriptor, dependency failed"
                        );
                        records[j].fail_unstarted(
                            i,
                            ProvisionerError::DependencyFailed {
                                addr: dependent.clone(),
                                dependency: addr.clone(),
                            },
                        );
                    }
                }
            }
        }

        // Only an abort leaves descriptors untouched.
        if let Some(origin) = abort_origin {
            for (j, record) in records.iter_mut().enumerate() {
                if record.state == DescriptorState::Pending {
                    record.fail_unstarted(
                        origin,
                        ProvisionerError::Aborted {
                            addr: graph.nodes()[j].clone(),
                        },
                    );
                }
            }
        }

        let applied = records
            .iter()
            .filter(|r| r.state == DescriptorState::Applied)
            .count();
        let roots_failed = graph
            .root_indices()
            .all(|i| records[i].state == DescriptorState::Failed);
        let mut state = if applied == n {
            RunState::Succeeded
        } else if abort_origin.is_some() || applied == 0 || roots_failed {
            RunState::Failed
        } else {
            RunState::PartiallyFailed
        };

        let mut outputs = BTreeMap::new();
        let mut run_error = None;
        if state == RunState::Succeeded {
            match ctx.evaluate_outputs() {
                Ok(evaluated) => outputs = evaluated,
                Err(err) => {
                    error!(error = %ctx.broker.redactor().redact(&err.to_string()), "run outputs could not be evaluated");
                    run_error = Some(err);
                    state = RunState::Failed;
                }
            }
        }

        let redactor = ctx.broker.redactor();
        let resources = records
            .into_iter()
            .zip(manifest.resources.iter())
            .zip(graph.nodes())
            .map(|((record, descriptor), addr)| DescriptorReport {
                addr: addr.clone(),
                mode: descriptor.mode,
                state: record.state,
                failed_during: record.failed_during,
                attempts: record.attempts,
                resource_id: record.resource_id,
                origin: record.origin.map(|o| graph.nodes()[o].clone()),
                error: record
                    .error
                    .map(|e| redactor.redact(&format_err_chain(&e))),
            })
            .collect::<Vec<_>>();

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Timestamp::now(),
            state,
            resources,
            outputs,
            error: run_error.map(|e| redactor.redact(&format_err_chain(&e))),
        };

        info!(
            %run_id,
            state = report.state.as_str(),
            applied = report.applied_count(),
            failed = report.failed().count(),
            "run finished"
        );
        Ok(report)
    }
}

struct NodeRecord {
    state: DescriptorState,
    failed_during: Option<DescriptorState>,
    attempts: u32,
    resource_id: Option<String>,
    origin: Option<usize>,
    error: Option<ProvisionerError>,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            state: DescriptorState::Pending,
            failed_during: None,
            attempts: 0,
            resource_id: None,
            origin: None,
            error: None,
        }
    }
}

impl NodeRecord {
    fn fail_unstarted(&mut self, origin: usize, error: ProvisionerError) {
        self.state = DescriptorState::Failed;
        self.failed_during = Some(DescriptorState::Pending);
        self.origin = Some(origin);
        self.error = Some(error);
    }
}

struct NodeOutcome {
    index: usize,
    /// Last phase reached.
    phase: DescriptorState,
    attempts: u32,
    result: Result<String, ProvisionerError>,
}

struct Step {
    phase: DescriptorState,
    attempts: u32,
    result: Result<Attributes, ProvisionerError>,
}

impl Step {
    fn failed(phase: DescriptorState, err: ProvisionerError) -> Self {
        Self {
            phase,
            attempts: 0,
            result: Err(err),
        }
    }
}

struct RunContext<'r, P> {
    manifest: &'r Manifest,
    config: &'r DeploymentConfig,
    provider: &'r P,
    broker: OutputBroker<'r>,
    resolver: ScopeResolver<'r>,
    grants: GrantModule<'r, P>,
}

impl<'r, P: Provider> RunContext<'r, P> {
    async fn process(&self, index: usize) -> NodeOutcome {
        let descriptor = &self.manifest.resources[index];
        let addr = descriptor.addr();
        debug!(addr = %addr, state = DescriptorState::Resolving.as_str(), "resolving descriptor");

        let step = match self.resolver.resolve(descriptor) {
            Err(err) => Step::failed(DescriptorState::Resolving, err),
            Ok(scope) => match (descriptor.mode, descriptor.kind) {
                (Mode::Existing, _) => self.read_existing(descriptor, &addr, &scope).await,
                (Mode::Managed, ResourceKind::RoleAssignment) => {
                    self.assign_role(descriptor, &addr, &scope).await
                }
                (Mode::Managed, _) => self.apply(descriptor, &addr, &scope).await,
            },
        };

        let result = step.result.and_then(|attributes| {
            let resource_id = attributes
                .get_str("resource_id")
                .map(str::to_string)
                .ok_or_else(|| ProvisionerError::MissingOutput {
                    consumer: descriptor.name.clone(),
                    reference: format!("{}.resource_id", descriptor.name),
                })?;
            debug!(addr = %addr, attributes = %attributes.redacted(), "outputs captured");
            self.broker.capture(&addr, attributes)?;
            Ok(resource_id)
        });

        NodeOutcome {
            index,
            phase: step.phase,
            attempts: step.attempts,
            result,
        }
    }

    /// Existing descriptors are never applied, only read. They stay in
    /// `Resolving` until the read completes.
    async fn read_existing(
        &self,
        descriptor: &ResourceDescriptor,
        addr: &ResourceAddr,
        scope: &ResolvedScope,
    ) -> Step {
        let properties = match self.broker.resolve_properties(&descriptor.name, &descriptor.properties) {
            Ok(properties) => properties,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };
        let name = match self.provider_name(descriptor, addr, &properties) {
            Ok(name) => name,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };

        info!(
            addr = %addr,
            scope = %scope.handle,
            foreign = scope.foreign,
            name = %name,
            "reading existing resource"
        );
        let redactor = self.broker.redactor();
        let outcome = retry_transient(&self.config.retry_config(), &addr.to_string(), &redactor, |_| {
            self.provider.read_existing(descriptor.kind, &scope.handle, &name)
        })
        .await;

        Step {
            phase: DescriptorState::Resolving,
            attempts: outcome.attempts,
            result: outcome.result.map_err(|source| ProvisionerError::Provider {
                addr: addr.clone(),
                source,
            }),
        }
    }

    async fn assign_role(
        &self,
        descriptor: &ResourceDescriptor,
        addr: &ResourceAddr,
        scope: &ResolvedScope,
    ) -> Step {
        let properties = match self.broker.resolve_properties(&descriptor.name, &descriptor.properties) {
            Ok(properties) => properties,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };
        let (principal_id, target, role) = match grant_fields(addr, &properties) {
            Ok(fields) => fields,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };

        info!(
            addr = %addr,
            state = DescriptorState::Applying.as_str(),
            scope = %scope.handle,
            "applying role assignment"
        );
        let outcome = self
            .grants
            .grant_with_attempts(principal_id, target, role, &self.broker.redactor())
            .await;
        Step {
            phase: DescriptorState::Applying,
            attempts: outcome.attempts,
            result: outcome.result.map(|granted| granted.attributes()),
        }
    }

    async fn apply(
        &self,
        descriptor: &ResourceDescriptor,
        addr: &ResourceAddr,
        scope: &ResolvedScope,
    ) -> Step {
        // Resolved as late as possible so composed secrets live only for the
        // duration of the call.
        let properties = match self.broker.resolve_properties(&descriptor.name, &descriptor.properties) {
            Ok(properties) => properties,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };
        let name = match self.provider_name(descriptor, addr, &properties) {
            Ok(name) => name,
            Err(err) => return Step::failed(DescriptorState::Resolving, err),
        };

        let request = ApplyRequest {
            addr: addr.clone(),
            kind: descriptor.kind,
            resource_id: scope.handle.resource_id(descriptor.kind, &name),
            scope: scope.handle.clone(),
            name,
            properties,
        };

        info!(
            addr = %addr,
            state = DescriptorState::Applying.as_str(),
            scope = %scope.handle,
            foreign = scope.foreign,
            name = %request.name,
            "applying descriptor"
        );
        debug!(addr = %addr, properties = %request.properties.redacted(), "resolved properties");

        let redactor = self.broker.redactor();
        let outcome = retry_transient(&self.config.retry_config(), &addr.to_string(), &redactor, |attempt| {
            debug!(addr = %addr, attempt, "calling provider");
            self.provider.apply_resource(&request)
        })
        .await;

        Step {
            phase: DescriptorState::Applying,
            attempts: outcome.attempts,
            result: outcome.result.map_err(|source| ProvisionerError::Provider {
                addr: addr.clone(),
                source,
            }),
        }
    }

    /// Provider-facing name: the `name` property, else one generated from
    /// the configured prefix and environment.
    fn provider_name(
        &self,
        descriptor: &ResourceDescriptor,
        addr: &ResourceAddr,
        properties: &ResolvedProperties,
    ) -> Result<String, ProvisionerError> {
        if properties.get("name").is_none() {
            return Ok(self.config.resource_name(&descriptor.name));
        }
        plain_property(addr, properties, "name").map(str::to_string)
    }

    fn evaluate_outputs(&self) -> Result<BTreeMap<String, RunOutput>, ProvisionerError> {
        self.manifest
            .outputs
            .iter()
            .map(|(name, value)| {
                let resolved = self.broker.resolve_value(&format!("outputs.{name}"), value)?;
                let output = RunOutput {
                    secret: resolved.is_secret(),
                    value: resolved.redacted(),
                };
                Ok((name.clone(), output))
            })
            .collect()
    }
}

fn grant_fields<'p>(
    addr: &ResourceAddr,
    properties: &'p ResolvedProperties,
) -> Result<(&'p str, &'p str, &'p str), ProvisionerError> {
    Ok((
        plain_property(addr, properties, "principal_id")?,
        plain_property(addr, properties, "target")?,
        plain_property(addr, properties, "role")?,
    ))
}

fn plain_property<'p>(
    addr: &ResourceAddr,
    properties: &'p ResolvedProperties,
    property: &str,
) -> Result<&'p str, ProvisionerError> {
    let invalid = |reason: &str| ProvisionerError::InvalidProperty {
        addr: addr.clone(),
        property: property.to_string(),
        reason: reason.to_string(),
    };
    match properties.get(property) {
        None => Err(invalid("missing")),
        Some(ResolvedValue::Secret(_)) => Err(invalid("must not be secret")),
        Some(value) => value.as_str().ok_or_else(|| invalid("must be a string")),
    }
}
