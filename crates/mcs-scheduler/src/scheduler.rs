//! Scheduler: the serialized controller behind `doNewAppGroup` and GC.
//!
//! One request at a time: a scheduling run takes the lock without waiting
//! and reports [`SchedulerError::Locked`] when another task holds it, the
//! periodic cleanup waits for it. A run then
//! - validates the apps and their dependencies,
//! - snapshots every cloud,
//! - derives a seeded canonical app order,
//! - runs the chosen algorithm on a blocking thread,
//! - creates, joins and deploys what the plan asks for (unless dry-run),
//! - persists a run record with the fitness trace.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use mcs_core::{AppInfo, K8sApp, PodHost, SchedulerConfig};
use mcs_placement::{
    AlgorithmKind, Application, GaParams, PlacementError, Problem, SchedRng, ScheduleOutcome, Solution,
    check_dependencies, check_plan, rng_from_seed,
};
use mcs_state::{RunPlacement, RunRecord, RunStatus, StateStore};

use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::{execute, with_schedule_info};
use crate::gc::{GcReport, sweep};
use crate::infra::Infra;
use crate::snapshot::build_snapshot;
use crate::validation::{to_applications, validate_apps};

/// One `doNewAppGroup` call.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRequest {
    pub apps: Vec<K8sApp>,
    /// Falls back to `ga.default_algorithm`.
    pub algorithm: Option<AlgorithmKind>,
    pub expected_time_one_cpu: Option<f64>,
}

/// State of one run; lives as long as the request and holds the lock.
struct RunContext<'a> {
    _guard: MutexGuard<'a, ()>,
    id: String,
    seed: u64,
    started_at: u64,
    rng: SchedRng,
}

impl<'a> RunContext<'a> {
    fn new(guard: MutexGuard<'a, ()>, seed: u64) -> Self {
        let started_at = epoch_millis();
        Self {
            _guard: guard,
            id: format!("run-{started_at:013}-{seed:016x}"),
            seed,
            started_at,
            rng: rng_from_seed(seed),
        }
    }
}

pub struct Scheduler {
    infra: Infra,
    state: StateStore,
    config: SchedulerConfig,
    /// Scheduling, migration and cleanup never overlap.
    lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(infra: Infra, state: StateStore, config: SchedulerConfig) -> Self {
        Self {
            infra,
            state,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn infra(&self) -> &Infra {
        &self.infra
    }

    /// Schedule and deploy a batch of applications.
    ///
    /// Returns the deployed apps; with `deploy.dry_run` the apps as planned.
    pub async fn do_new_app_group(&self, request: ScheduleRequest) -> SchedulerResult<Vec<AppInfo>> {
        let guard = self.lock.try_lock().map_err(|_| {
            warn!(apps = request.apps.len(), "scheduler busy, request refused");
            SchedulerError::Locked
        })?;

        let apps = self.validate(&request.apps)?;

        let kind = match request.algorithm {
            Some(kind) => kind,
            None => self.config.ga.default_algorithm.parse::<AlgorithmKind>()?,
        };
        let seed = self.config.ga.seed.unwrap_or_else(rand::random);
        let mut ctx = RunContext::new(guard, seed);
        info!(run = %ctx.id, algorithm = %kind, seed, apps = apps.len(), "scheduling run started");

        let clouds = build_snapshot(&self.infra, &self.state).await?;
        let order = Problem::canonical_order(apps.iter().map(|a| &a.name), &mut ctx.rng);
        debug!(run = %ctx.id, ?order, "canonical order drawn");
        let problem = Problem::new(clouds, apps, order, self.config.placement.clone())?;

        let params = GaParams::from(&self.config.ga);
        let mut rng = ctx.rng.clone();
        let (problem, result) = tokio::task::spawn_blocking(move || {
            let result = kind.build(params).schedule(&problem, &mut rng);
            (problem, result)
        })
        .await
        .map_err(|e| PlacementError::Invariant(format!("scheduling task failed: {e}")))?;

        let outcome = match result.and_then(|outcome| verified(&problem, outcome)) {
            Ok(outcome) => outcome,
            Err(e) => {
                let status = match &e {
                    PlacementError::Unusable { .. } => {
                        warn!(run = %ctx.id, algorithm = %kind, "no usable plan");
                        RunStatus::Unusable
                    }
                    other => {
                        error!(run = %ctx.id, algorithm = %kind, error = %other, "scheduling failed");
                        RunStatus::Failed { error: other.to_string() }
                    }
                };
                self.save_run(&ctx, kind, &request, None, status)?;
                return Err(e.into());
            }
        };

        let plan = &outcome.solution;
        info!(
            run = %ctx.id,
            algorithm = %kind,
            accepted = plan.accepted_count(),
            apps = problem.apps.len(),
            vms = plan.vms_to_create.len(),
            fitness = ?outcome.final_fitness,
            "plan computed"
        );

        if self.config.deploy.dry_run {
            self.save_run(&ctx, kind, &request, Some(&outcome), RunStatus::Planned)?;
            return Ok(planned_app_infos(&request.apps, plan));
        }

        let report = execute(&self.infra, &self.state, &ctx.id, &request.apps, plan).await;
        if report.errors.is_empty() {
            self.save_run(&ctx, kind, &request, Some(&outcome), RunStatus::Deployed)?;
        } else if report.deployed.is_empty() && plan.accepted_count() > 0 {
            let status = RunStatus::Failed {
                error: report.errors.join("; "),
            };
            self.save_run(&ctx, kind, &request, Some(&outcome), status)?;
            return Err(SchedulerError::Deploy(report.errors));
        } else {
            warn!(run = %ctx.id, errors = report.errors.len(), "plan partially deployed");
            let status = RunStatus::PartiallyDeployed {
                errors: report.errors.clone(),
            };
            self.save_run(&ctx, kind, &request, Some(&outcome), status)?;
        }

        info!(run = %ctx.id, deployed = report.deployed.len(), vms = report.created_vms.len(), "scheduling run finished");
        Ok(report.deployed)
    }

    /// Run one GC sweep, waiting for any running task to finish first.
    pub async fn gc(&self) -> SchedulerResult<GcReport> {
        let _guard = self.lock.lock().await;
        sweep(&self.infra, &self.state).await
    }

    /// Run one GC sweep unless another task holds the lock.
    pub async fn try_gc(&self) -> SchedulerResult<GcReport> {
        let _guard = self.lock.try_lock().map_err(|_| {
            warn!("scheduler busy, cleanup refused");
            SchedulerError::Locked
        })?;
        sweep(&self.infra, &self.state).await
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// App checks first, then dependency checks on the converted apps.
    fn validate(&self, apps: &[K8sApp]) -> SchedulerResult<Vec<Application>> {
        let errors = validate_apps(apps, self.config.placement.cpu_core_step);
        if !errors.is_empty() {
            warn!(errors = errors.len(), "invalid applications refused");
            return Err(SchedulerError::Validation(errors));
        }
        let converted = to_applications(apps).map_err(SchedulerError::Validation)?;

        let by_name: BTreeMap<String, Application> =
            converted.iter().map(|a| (a.name.clone(), a.clone())).collect();
        let names: Vec<String> = by_name.keys().cloned().collect();
        let errors = check_dependencies(&by_name, &names);
        if !errors.is_empty() {
            warn!(errors = errors.len(), "invalid dependencies refused");
            return Err(SchedulerError::Validation(errors));
        }
        Ok(converted)
    }

    fn save_run(
        &self,
        ctx: &RunContext<'_>,
        kind: AlgorithmKind,
        request: &ScheduleRequest,
        outcome: Option<&ScheduleOutcome>,
        status: RunStatus,
    ) -> SchedulerResult<()> {
        let placements = request
            .apps
            .iter()
            .map(|app| {
                let gene = outcome.and_then(|o| o.solution.get(&app.name)).filter(|g| g.accepted);
                RunPlacement {
                    app: app.name.clone(),
                    accepted: gene.is_some(),
                    cloud: gene.map(|g| g.target_cloud.clone()),
                    node: gene.map(|g| g.k8s_node.clone()),
                    cpu: gene.map(|g| g.allocated_cpu_core),
                    estimated_secs: gene
                        .and_then(|g| estimated_secs(request.expected_time_one_cpu, g.allocated_cpu_core)),
                }
            })
            .collect::<Vec<_>>();

        let run = RunRecord {
            id: ctx.id.clone(),
            algorithm: kind.to_string(),
            seed: ctx.seed,
            expected_time_one_cpu: request.expected_time_one_cpu.unwrap_or_default(),
            app_count: request.apps.len(),
            accepted_count: placements.iter().filter(|p| p.accepted).count(),
            placements,
            vms_to_create: outcome
                .map(|o| o.solution.vms_to_create.iter().map(|vm| vm.name.clone()).collect())
                .unwrap_or_default(),
            final_fitness: outcome.and_then(|o| o.final_fitness),
            best_fitness_each_iter: outcome.map(|o| o.best_fitness_each_iter.clone()).unwrap_or_default(),
            status,
            started_at: ctx.started_at,
            finished_at: epoch_millis(),
        };
        self.state.put_run(&run)?;
        Ok(())
    }
}

/// Refuse to act on a plan that breaks a placement invariant.
fn verified(problem: &Problem, outcome: ScheduleOutcome) -> Result<ScheduleOutcome, PlacementError> {
    match check_plan(problem, &outcome.solution) {
        Ok(()) => Ok(outcome),
        Err(reason) => Err(PlacementError::Invariant(format!("returned plan is not acceptable: {reason}"))),
    }
}

/// What a dry run reports: the accepted apps and the node each would land on.
pub fn planned_app_infos(apps: &[K8sApp], plan: &Solution) -> Vec<AppInfo> {
    with_schedule_info(apps, plan)
        .into_iter()
        .map(|app| AppInfo {
            app_name: app.name.clone(),
            hosts: vec![PodHost {
                host_ip: String::new(),
                host_name: app.node_name.clone(),
            }],
            status: "planned".to_string(),
            priority: app.priority,
            auto_scheduled: app.auto_scheduled,
            ..AppInfo::default()
        })
        .collect()
}

/// Running time of a job that takes `one_cpu` seconds on a single core,
/// spread over `cpu` cores.
fn estimated_secs(one_cpu: Option<f64>, cpu: f64) -> Option<f64> {
    match one_cpu {
        Some(secs) if cpu > 0.0 => Some(secs / cpu),
        _ => None,
    }
}

/// Current Unix epoch in milliseconds.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use mcs_core::CloudType;

    use crate::infra::{CloudProvider, KubeCluster};
    use crate::memory::tests::make_res;
    use crate::memory::{StaticCloud, StaticCluster};
    use crate::validation::tests::{make_k8s_app, with_deps};

    fn test_config(seed: u64) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config.ga.chromosomes = 6;
        config.ga.iterations = 5;
        config.ga.seed = Some(seed);
        config
    }

    fn test_scheduler(config: SchedulerConfig) -> (Scheduler, Arc<StaticCloud>, Arc<StaticCluster>) {
        let nokia = Arc::new(StaticCloud::new(
            "NOKIA4",
            CloudType::Proxmox,
            make_res(56.0, 128_796.75, 1396.52),
            make_res(26.0, 59_392.0, 629.0),
            4,
        ));
        let claaudia = Arc::new(StaticCloud::new(
            "CLAAUDIA",
            CloudType::Openstack,
            make_res(-1.0, -1.0, -1.0),
            make_res(0.0, 0.0, 0.0),
            5,
        ));
        let cluster = Arc::new(StaticCluster::new());
        let infra = Infra::new(
            vec![nokia.clone() as Arc<dyn CloudProvider>, claaudia as Arc<dyn CloudProvider>],
            cluster.clone() as Arc<dyn KubeCluster>,
        );
        let scheduler = Scheduler::new(infra, StateStore::open_in_memory().unwrap(), config);
        (scheduler, nokia, cluster)
    }

    fn test_request(algorithm: Option<AlgorithmKind>) -> ScheduleRequest {
        ScheduleRequest {
            apps: vec![
                with_deps(make_k8s_app("web", "2", "1024Mi", "10Gi", 5), &["db"]),
                make_k8s_app("db", "1.5", "2048Mi", "20Gi", 10),
                make_k8s_app("batch", "1", "512Mi", "5Gi", 3),
            ],
            algorithm,
            expected_time_one_cpu: Some(35.0),
        }
    }

    #[tokio::test]
    async fn schedules_and_deploys_everything_that_fits() {
        let (scheduler, nokia, cluster) = test_scheduler(test_config(7));

        let infos = scheduler.do_new_app_group(test_request(None)).await.unwrap();
        assert_eq!(infos.len(), 3);
        assert_eq!(cluster.deployed().await.len(), 3);
        assert!(!nokia.list_vms().await.unwrap().is_empty());

        let runs = scheduler.state().list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.algorithm, "Mcssga");
        assert_eq!(run.seed, 7);
        assert_eq!(run.accepted_count, 3);
        assert_eq!(run.status, RunStatus::Deployed);
        assert_eq!(run.expected_time_one_cpu, 35.0);
        for placement in &run.placements {
            let cpu = placement.cpu.unwrap();
            assert!((placement.estimated_secs.unwrap() - 35.0 / cpu).abs() < 1e-9);
        }
        assert!(!run.best_fitness_each_iter.is_empty());
        assert!(run.final_fitness.is_some());
        assert_eq!(scheduler.state().list_auto_vms().unwrap().len(), run.vms_to_create.len());
    }

    #[tokio::test]
    async fn every_deployed_app_is_pinned() {
        let (scheduler, _nokia, cluster) = test_scheduler(test_config(11));
        scheduler
            .do_new_app_group(test_request(Some(AlgorithmKind::BeRand)))
            .await
            .unwrap();
        let nodes = cluster.node_names().await;
        for app in cluster.deployed().await {
            assert!(nodes.contains(&app.node_name), "{} on {}", app.name, app.node_name);
            let cpu: f64 = app.containers[0].resources.requests.cpu.parse().unwrap();
            assert!(cpu >= 0.1);
        }
    }

    #[tokio::test]
    async fn busy_scheduler_refuses() {
        let (scheduler, _nokia, _cluster) = test_scheduler(test_config(7));
        let _held = scheduler.lock.lock().await;

        let err = scheduler.do_new_app_group(test_request(None)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Locked));
        assert!(matches!(scheduler.try_gc().await, Err(SchedulerError::Locked)));
    }

    #[tokio::test]
    async fn invalid_apps_are_refused_before_snapshot() {
        let (scheduler, nokia, _cluster) = test_scheduler(test_config(7));
        let mut request = test_request(None);
        request.apps[2].replicas = 3;
        request.apps[1].priority = 0;

        match scheduler.do_new_app_group(request).await {
            Err(SchedulerError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert!(nokia.list_vms().await.unwrap().is_empty());
        assert!(scheduler.state().list_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dependency_errors_are_validation_errors() {
        let (scheduler, _nokia, _cluster) = test_scheduler(test_config(7));
        let mut request = test_request(None);
        request.apps[2] = with_deps(make_k8s_app("batch", "1", "512Mi", "5Gi", 3), &["ghost"]);

        let err = scheduler.do_new_app_group(request).await.unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");

        let cyclic = ScheduleRequest {
            apps: vec![
                with_deps(make_k8s_app("a", "1", "", "", 5), &["b"]),
                with_deps(make_k8s_app("b", "1", "", "", 5), &["a"]),
            ],
            ..ScheduleRequest::default()
        };
        let err = scheduler.do_new_app_group(cyclic).await.unwrap_err();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn run_time_estimate_needs_a_one_core_time() {
        assert_eq!(estimated_secs(Some(42.0), 2.0), Some(21.0));
        assert_eq!(estimated_secs(Some(42.0), 0.0), None);
        assert_eq!(estimated_secs(None, 2.0), None);
    }

    #[tokio::test]
    async fn unusable_plans_are_recorded() {
        let mut unusable = 0;
        for seed in 0..20 {
            let (scheduler, _nokia, _cluster) = test_scheduler(test_config(seed));
            let request = ScheduleRequest {
                apps: vec![make_k8s_app("huge", "4", "1000000Mi", "10Gi", 5)],
                algorithm: Some(AlgorithmKind::CompRand),
                expected_time_one_cpu: None,
            };
            match scheduler.do_new_app_group(request).await {
                Ok(infos) => assert!(infos.is_empty()),
                Err(e) => {
                    assert!(e.is_unusable(), "{e}");
                    let runs = scheduler.state().list_runs(1).unwrap();
                    assert_eq!(runs[0].status, RunStatus::Unusable);
                    assert_eq!(runs[0].accepted_count, 0);
                    unusable += 1;
                }
            }
        }
        assert!(unusable > 0);
    }

    #[tokio::test]
    async fn dry_run_only_plans() {
        let mut config = test_config(3);
        config.deploy.dry_run = true;
        let (scheduler, nokia, cluster) = test_scheduler(config);

        let infos = scheduler
            .do_new_app_group(test_request(Some(AlgorithmKind::Amaga)))
            .await
            .unwrap();
        assert_eq!(infos.len(), 3);
        assert!(infos.iter().all(|i| i.status == "planned"));
        assert!(infos.iter().all(|i| !i.hosts[0].host_name.is_empty()));
        assert!(nokia.list_vms().await.unwrap().is_empty());
        assert!(cluster.deployed().await.is_empty());

        let run = &scheduler.state().list_runs(1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Planned);
        assert_eq!(run.algorithm, "Amaga");
    }

    #[tokio::test]
    async fn unknown_default_algorithm_fails() {
        let mut config = test_config(3);
        config.ga.default_algorithm = "Simplex".into();
        let (scheduler, _nokia, _cluster) = test_scheduler(config);
        let err = scheduler.do_new_app_group(test_request(None)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Placement(PlacementError::UnknownAlgorithm(_))));
    }

    #[tokio::test]
    async fn gc_after_run_keeps_busy_nodes() {
        let (scheduler, nokia, _cluster) = test_scheduler(test_config(7));
        scheduler.do_new_app_group(test_request(None)).await.unwrap();
        let before = nokia.list_vms().await.unwrap().len();

        let report = scheduler.gc().await.unwrap();
        assert!(report.deleted_vms.is_empty());
        assert_eq!(report.kept_nodes.len(), before);
    }

    #[test]
    fn dry_run_infos_follow_plan() {
        let apps = test_request(None).apps;
        let mut plan = Solution::default();
        plan.set(
            "db",
            mcs_placement::SingleAppSolution {
                accepted: true,
                target_cloud: "NOKIA4".into(),
                k8s_node: "auto-sched-nokia4-0".into(),
                allocated_cpu_core: 1.5,
            },
        );
        let infos = planned_app_infos(&apps, &plan);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].app_name, "db");
        assert_eq!(infos[0].hosts[0].host_name, "auto-sched-nokia4-0");
        assert_eq!(infos[0].priority, 10);
    }
}
