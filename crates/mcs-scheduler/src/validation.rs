//! Request validation and conversion of `K8sApp`s into scheduling input.
//!
//! Auto-scheduled applications are deliberately narrow: one replica, one
//! container, requests equal to limits and whole-or-fractional CPU cores.
//! Every violation is collected so the caller sees all of them at once.

use std::collections::BTreeSet;

use regex::Regex;

use mcs_core::{CPU_RES_REGEX, K8sApp, K8sResList, MEM_UNIT_SUFFIX, STORAGE_UNIT_SUFFIX};
use mcs_placement::{Application, GenericResources, MAX_PRIORITY, MIN_PRIORITY};

/// Check every application of a request; an empty result means valid.
pub fn validate_apps(apps: &[K8sApp], cpu_core_step: f64) -> Vec<String> {
    let mut errors = Vec::new();

    let cpu_re = match Regex::new(CPU_RES_REGEX) {
        Ok(re) => Some(re),
        Err(e) => {
            errors.push(format!("cpu pattern {CPU_RES_REGEX} does not compile: {e}"));
            None
        }
    };

    let mut seen = BTreeSet::new();
    for app in apps {
        if !app.name.is_empty() && !seen.insert(app.name.as_str()) {
            errors.push(format!("application name {} is used more than once", app.name));
        }
        validate_app(app, cpu_re.as_ref(), cpu_core_step, &mut errors);
    }

    errors
}

fn validate_app(app: &K8sApp, cpu_re: Option<&Regex>, cpu_core_step: f64, errors: &mut Vec<String>) {
    let name = &app.name;
    if name.is_empty() {
        errors.push("an application has no name".to_string());
    }
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&app.priority) {
        errors.push(format!(
            "application {name}: priority must be within [{MIN_PRIORITY}, {MAX_PRIORITY}], got {}",
            app.priority
        ));
    }
    if !app.auto_scheduled {
        errors.push(format!("application {name}: autoScheduled must be true"));
    }
    if app.replicas != 1 {
        errors.push(format!("application {name}: replicas must be 1, got {}", app.replicas));
    }
    if !app.node_name.is_empty() {
        errors.push(format!(
            "application {name}: nodeName must not be set, got {}",
            app.node_name
        ));
    }
    if !app.node_selector.is_empty() {
        errors.push(format!(
            "application {name}: nodeSelector must not be set, got {:?}",
            app.node_selector
        ));
    }
    if app.containers.len() != 1 {
        errors.push(format!(
            "application {name}: exactly one container is allowed, got {}",
            app.containers.len()
        ));
    }

    for container in &app.containers {
        let res = &container.resources;
        if res.requests != res.limits {
            errors.push(format!(
                "application {name}: resource requests {:?} must equal limits {:?}",
                res.requests, res.limits
            ));
        }
        validate_requests(name, &res.requests, cpu_re, cpu_core_step, errors);
    }
}

fn validate_requests(
    name: &str,
    req: &K8sResList,
    cpu_re: Option<&Regex>,
    cpu_core_step: f64,
    errors: &mut Vec<String>,
) {
    match cpu_re {
        Some(re) if !re.is_match(&req.cpu) => errors.push(format!(
            "application {name}: cpu {:?} must match {CPU_RES_REGEX}",
            req.cpu
        )),
        Some(_) => match req.cpu.parse::<f64>() {
            Ok(cpu) if cpu < cpu_core_step => errors.push(format!(
                "application {name}: cpu {cpu} is below the allocation step {cpu_core_step}"
            )),
            _ => {}
        },
        None => {}
    }

    if !req.memory.is_empty() && !req.memory.ends_with(MEM_UNIT_SUFFIX) {
        errors.push(format!(
            "application {name}: memory {:?} must use the unit {MEM_UNIT_SUFFIX}",
            req.memory
        ));
    }
    if !req.storage.is_empty() && !req.storage.ends_with(STORAGE_UNIT_SUFFIX) {
        errors.push(format!(
            "application {name}: storage {:?} must use the unit {STORAGE_UNIT_SUFFIX}",
            req.storage
        ));
    }
}

/// Parse a resource list into `(cores, MiB, GiB)`. Empty quantities are 0.
pub fn parse_requests(req: &K8sResList) -> Result<GenericResources, String> {
    let cpu = parse_quantity(&req.cpu, "")?;
    let memory = parse_quantity(&req.memory, MEM_UNIT_SUFFIX)?;
    let storage = parse_quantity(&req.storage, STORAGE_UNIT_SUFFIX)?;
    Ok(GenericResources::new(cpu, memory, storage))
}

fn parse_quantity(value: &str, suffix: &str) -> Result<f64, String> {
    if value.is_empty() {
        return Ok(0.0);
    }
    let number = value.strip_suffix(suffix).unwrap_or(value);
    number
        .parse::<f64>()
        .map_err(|e| format!("quantity {value:?} is not a number: {e}"))
}

/// Requests summed over the containers of `app`.
pub fn requested_resources(app: &K8sApp) -> Result<GenericResources, String> {
    app.containers
        .iter()
        .try_fold(GenericResources::default(), |acc, container| {
            Ok(acc + parse_requests(&container.resources.requests)?)
        })
}

/// Convert validated applications into the scheduling model.
pub fn to_applications(apps: &[K8sApp]) -> Result<Vec<Application>, Vec<String>> {
    let mut out = Vec::with_capacity(apps.len());
    let mut errors = Vec::new();
    for app in apps {
        match requested_resources(app) {
            Ok(resources) => {
                let deps: Vec<&str> = app.dependencies.iter().map(|d| d.app_name.as_str()).collect();
                out.push(Application::new(&app.name, app.priority, resources).with_dependencies(&deps));
            }
            Err(e) => errors.push(format!("application {}: {e}", app.name)),
        }
    }
    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mcs_core::{Dependency, K8sContainer, K8sResReq};

    pub(crate) fn make_k8s_app(name: &str, cpu: &str, memory: &str, storage: &str, priority: i32) -> K8sApp {
        let list = K8sResList {
            memory: memory.to_string(),
            cpu: cpu.to_string(),
            storage: storage.to_string(),
        };
        K8sApp {
            name: name.to_string(),
            replicas: 1,
            priority,
            auto_scheduled: true,
            containers: vec![K8sContainer {
                name: name.to_string(),
                image: "nginx".to_string(),
                resources: K8sResReq {
                    limits: list.clone(),
                    requests: list,
                },
                ..K8sContainer::default()
            }],
            ..K8sApp::default()
        }
    }

    pub(crate) fn with_deps(mut app: K8sApp, deps: &[&str]) -> K8sApp {
        app.dependencies = deps
            .iter()
            .map(|d| Dependency {
                app_name: d.to_string(),
            })
            .collect();
        app
    }

    #[test]
    fn valid_request_passes() {
        let apps = vec![
            make_k8s_app("web", "2", "1024Mi", "10Gi", 5),
            make_k8s_app("db", "1.5", "", "", 10),
        ];
        assert!(validate_apps(&apps, 0.1).is_empty());
    }

    #[test]
    fn collects_every_violation() {
        let mut app = make_k8s_app("web", "500m", "1Gi", "10Mi", 11);
        app.replicas = 2;
        app.auto_scheduled = false;
        app.node_name = "worker-1".into();
        app.node_selector.insert("zone".into(), "a".into());

        let errors = validate_apps(&[app], 0.1);
        assert_eq!(errors.len(), 8, "{errors:#?}");
        assert!(errors.iter().any(|e| e.contains("priority")));
        assert!(errors.iter().any(|e| e.contains("must match")));
        assert!(errors.iter().any(|e| e.contains("Mi")));
        assert!(errors.iter().any(|e| e.contains("Gi")));
    }

    #[test]
    fn requests_must_equal_limits() {
        let mut app = make_k8s_app("web", "1", "512Mi", "", 3);
        app.containers[0].resources.limits.cpu = "2".into();
        let errors = validate_apps(&[app], 0.1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must equal limits"));
    }

    #[test]
    fn rejects_duplicates_and_nameless_apps() {
        let apps = vec![
            make_k8s_app("web", "1", "", "", 3),
            make_k8s_app("web", "1", "", "", 3),
            make_k8s_app("", "1", "", "", 3),
        ];
        let errors = validate_apps(&apps, 0.1);
        assert_eq!(errors.len(), 2, "{errors:#?}");
    }

    #[test]
    fn container_count_is_checked() {
        let mut app = make_k8s_app("web", "1", "", "", 3);
        app.containers.clear();
        let errors = validate_apps(&[app], 0.1);
        assert_eq!(errors, vec!["application web: exactly one container is allowed, got 0".to_string()]);
    }

    #[test]
    fn cpu_below_step_is_rejected() {
        let apps = vec![make_k8s_app("tiny", "0.05", "", "", 3)];
        let errors = validate_apps(&apps, 0.1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("below the allocation step"));
    }

    #[test]
    fn parses_quantities() {
        let res = parse_requests(&K8sResList {
            memory: "1024Mi".into(),
            cpu: "2.5".into(),
            storage: "20Gi".into(),
        })
        .unwrap();
        assert_eq!(res, GenericResources::new(2.5, 1024.0, 20.0));

        let empty = parse_requests(&K8sResList::default()).unwrap();
        assert_eq!(empty, GenericResources::default());

        assert!(parse_quantity("abcMi", "Mi").is_err());
    }

    #[test]
    fn converts_to_applications() {
        let apps = vec![
            with_deps(make_k8s_app("web", "2", "1024Mi", "10Gi", 5), &["db"]),
            make_k8s_app("db", "1.5", "2048Mi", "", 10),
        ];
        let converted = to_applications(&apps).unwrap();
        assert_eq!(converted[0].name, "web");
        assert_eq!(converted[0].resources, GenericResources::new(2.0, 1024.0, 10.0));
        assert_eq!(converted[0].dependencies, vec!["db".to_string()]);
        assert_eq!(converted[1].priority, 10);
    }
}
