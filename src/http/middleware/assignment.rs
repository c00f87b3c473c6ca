//! Experiment assignment middleware.
//!
//! # Responsibilities
//! - Bucket visitors into every active experiment for requests under the scope prefix
//! - Rewrite routing-experiment "B" visitors into the alternate template tree
//! - Expose variants to handlers as request headers, echo them on the response
//! - Persist fresh assignments as sticky `Set-Cookie` headers
//!
//! # Design Decisions
//! - Wraps the whole router so a rewritten URI is what routing sees
//! - A rewrite re-enters the pass in-process; the routing step is skipped on
//!   the second pass and the alternate prefix is never rewritten again
//! - An [`AssignmentContext`] extension marks a processed request
//! - Registry failure passes the request through untouched (fail open)

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, uri::PathAndQuery, HeaderName, HeaderValue, Request, Uri},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{CookieConfig, EdgeConfig, ExperimentsConfig};
use crate::experiments::{
    assign, Assignment, ExperimentDefinition, ExperimentRegistry, ExperimentSet, RandomSource, Variant,
};
use crate::http::cookies::{read_cookie, StickyCookie};
use crate::observability::metrics;

/// State required for assignment.
#[derive(Clone)]
pub struct AssignmentState {
    pub registry: Arc<ExperimentRegistry>,
    pub config: Arc<ArcSwap<EdgeConfig>>,
    pub rng: Arc<dyn RandomSource>,
}

/// Attached to every request the middleware has processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentContext {
    /// Variant served per experiment id.
    pub variants: BTreeMap<String, Variant>,
    /// Original path when the routing experiment rewrote the request.
    pub rewritten_from: Option<String>,
    routing_done: bool,
}

impl AssignmentContext {
    pub fn variant(&self, experiment_id: &str) -> Option<Variant> {
        self.variants.get(experiment_id).copied()
    }

    pub fn was_rewritten(&self) -> bool {
        self.rewritten_from.is_some()
    }
}

/// Maps scope paths into the alternate template tree.
#[derive(Debug, Clone, Copy)]
pub struct RoutingRule<'a> {
    scope: &'a str,
    alternate: &'a str,
}

impl<'a> RoutingRule<'a> {
    pub fn new(config: &'a ExperimentsConfig) -> Self {
        Self {
            scope: &config.scope_prefix,
            alternate: &config.alternate_prefix,
        }
    }

    /// Inside the alternate tree, including its root without the trailing slash.
    pub fn is_alternate(&self, path: &str) -> bool {
        path.starts_with(self.alternate) || path == self.alternate.trim_end_matches('/')
    }

    /// Alternate-tree path for `path`, or `None` if it is already there or out of scope.
    pub fn alternate_path(&self, path: &str) -> Option<String> {
        if self.is_alternate(path) {
            return None;
        }
        path.strip_prefix(self.scope)
            .map(|rest| format!("{}{}", self.alternate, rest))
    }
}

/// Written back once downstream has answered.
#[derive(Default)]
struct ResponsePlan {
    /// At most one cookie per experiment.
    cookies: BTreeMap<String, StickyCookie>,
    headers: Vec<(HeaderName, Variant)>,
}

enum PassOutcome {
    Rewritten,
    Complete,
}

/// Everything one pass reads.
struct Assigner<'a> {
    snapshot: &'a ExperimentSet,
    experiments: &'a ExperimentsConfig,
    rng: &'a dyn RandomSource,
}

pub async fn assignment_middleware(
    State(state): State<AssignmentState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load_full();

    if !req.uri().path().starts_with(&config.experiments.scope_prefix)
        || req.extensions().get::<AssignmentContext>().is_some()
    {
        return next.run(req).await;
    }

    let snapshot = match state.registry.current().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(error = %e, path = %req.uri().path(), "Experiments unavailable, serving defaults");
            return next.run(req).await;
        }
    };

    // Clients do not get to pick their own variant.
    for header_name in config.experiments.variant_headers.values() {
        req.headers_mut().remove(header_name.as_str());
    }

    let assigner = Assigner {
        snapshot: &snapshot,
        experiments: &config.experiments,
        rng: &*state.rng,
    };
    let mut ctx = AssignmentContext::default();
    let mut plan = ResponsePlan::default();

    while let PassOutcome::Rewritten = assigner.run(&mut req, &mut ctx, &mut plan) {}

    req.extensions_mut().insert(ctx);
    let mut response = next.run(req).await;

    write_back(&mut response, plan, &config.cookies);
    response
}

impl Assigner<'_> {
    fn run(&self, req: &mut Request<Body>, ctx: &mut AssignmentContext, plan: &mut ResponsePlan) -> PassOutcome {
        let routing = self
            .snapshot
            .routing_experiment(self.experiments.routing_experiment.as_deref());

        if !ctx.routing_done {
            ctx.routing_done = true;

            if let Some(experiment) = routing {
                let assignment = self.resolve(experiment, req, ctx, plan);

                if assignment.variant == Variant::B {
                    let path = req.uri().path().to_string();
                    if let Some(target) = RoutingRule::new(self.experiments).alternate_path(&path) {
                        if rewrite_path(req, &target) {
                            tracing::debug!(experiment = %experiment.id, from = %path, to = %target, "Rewrote to alternate template");
                            metrics::record_rewrite(&experiment.id);
                            ctx.rewritten_from = Some(path);
                            return PassOutcome::Rewritten;
                        }
                    }
                }
            }
        }

        let routing_id = routing.map(|e| e.id.as_str());
        for experiment in self.snapshot.active() {
            if Some(experiment.id.as_str()) != routing_id {
                self.resolve(experiment, req, ctx, plan);
            }
        }

        PassOutcome::Complete
    }

    /// Resolve one experiment, queue its cookie if fresh and expose its header.
    fn resolve(
        &self,
        experiment: &ExperimentDefinition,
        req: &mut Request<Body>,
        ctx: &mut AssignmentContext,
        plan: &mut ResponsePlan,
    ) -> Assignment {
        if let Some(variant) = ctx.variant(&experiment.id) {
            return Assignment::sticky(variant);
        }

        let existing = read_cookie(req.headers(), &experiment.cookie_name);
        let assignment = assign(experiment, existing, self.rng);

        ctx.variants.insert(experiment.id.clone(), assignment.variant);
        metrics::record_assignment(&experiment.id, assignment.variant.as_str(), assignment.fresh);

        if assignment.fresh {
            tracing::debug!(experiment = %experiment.id, variant = %assignment.variant, "Fresh assignment");
            plan.cookies.insert(
                experiment.id.clone(),
                StickyCookie::new(&experiment.cookie_name, assignment.variant, experiment.cookie_duration_days),
            );
        }

        match HeaderName::from_bytes(self.experiments.header_for(&experiment.id).as_bytes()) {
            Ok(name) => {
                let value = HeaderValue::from_static(assignment.variant.as_str());
                req.headers_mut().insert(name.clone(), value);
                plan.headers.push((name, assignment.variant));
            }
            Err(_) => {
                tracing::warn!(experiment = %experiment.id, "No valid header name for experiment");
            }
        }

        assignment
    }
}

/// Replace the path, keeping the query string.
fn rewrite_path(req: &mut Request<Body>, path: &str) -> bool {
    let target = match req.uri().query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let Ok(path_and_query) = target.parse::<PathAndQuery>() else {
        return false;
    };

    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    match Uri::from_parts(parts) {
        Ok(uri) => {
            *req.uri_mut() = uri;
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path, "Rewrite produced an invalid URI");
            false
        }
    }
}

fn write_back(response: &mut Response, plan: ResponsePlan, cookies: &CookieConfig) {
    let now = Utc::now();
    let headers = response.headers_mut();

    for cookie in plan.cookies.values() {
        match cookie.header_value(cookies, now) {
            Some(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            None => tracing::warn!(
                cookie = %cookie.name,
                duration_days = cookie.duration_days,
                "Cookie not representable, skipped"
            ),
        }
    }
    for (name, variant) in plan.headers {
        headers.insert(name, HeaderValue::from_static(variant.as_str()));
    }
}
