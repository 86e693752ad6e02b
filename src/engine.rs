//! Outbound engine API consumed by the presentation layer.
//!
//! `MetricsEngine` owns nothing global: the fact source and the result cache
//! are injected, so several engines can share one cache or run side by side.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::{CacheKey, QueryKind, ResultCache};
use crate::core::config::Config;
use crate::core::errors::{LtcError, Result};
use crate::core::request::RequestContext;
use crate::metrics::aggregator::Aggregator;
use crate::metrics::bundle::{BundleKind, MetricsBundle, StateDistribution};
use crate::metrics::composer::{compose_claims, compose_executive, compose_policy};
use crate::metrics::filter::FilterSpec;
use crate::metrics::insights::{Insight, generate_insights};
use crate::source::{ClaimRow, FactSource, PolicyRow};

const DEFAULT_RETRIES: u32 = 1;
const DEFAULT_MAX_ROW_LIMIT: usize = 10_000;

/// Everything the engine memoizes, behind one cache type.
#[derive(Debug, Clone)]
pub enum CachedValue {
    Bundle(Arc<MetricsBundle>),
    Claims(Arc<Vec<ClaimRow>>),
    Policies(Arc<Vec<PolicyRow>>),
    States(Arc<Vec<StateDistribution>>),
}

impl CachedValue {
    const fn variant(&self) -> &'static str {
        match self {
            Self::Bundle(_) => "bundle",
            Self::Claims(_) => "claim rows",
            Self::Policies(_) => "policy rows",
            Self::States(_) => "state distribution",
        }
    }
}

fn mismatch(expected: &str, got: &CachedValue) -> LtcError {
    LtcError::Runtime {
        details: format!("cache slot held {} where {expected} was expected", got.variant()),
    }
}

/// Claims and policy bundles side by side, plus the cross-relation composite.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveSummary {
    pub claims: MetricsBundle,
    pub policy: MetricsBundle,
    pub composite: MetricsBundle,
    pub claims_insights: Vec<Insight>,
    pub policy_insights: Vec<Insight>,
}

/// Parameterized metrics over one fact source, memoized in a shared cache.
pub struct MetricsEngine {
    source: Arc<dyn FactSource>,
    cache: Arc<ResultCache<CachedValue>>,
    retries: u32,
    max_row_limit: usize,
}

impl MetricsEngine {
    pub fn new(source: Arc<dyn FactSource>, cache: Arc<ResultCache<CachedValue>>) -> Self {
        Self {
            source,
            cache,
            retries: DEFAULT_RETRIES,
            max_row_limit: DEFAULT_MAX_ROW_LIMIT,
        }
    }

    /// Engine with its own cache built from `config`.
    pub fn from_config(source: Arc<dyn FactSource>, config: &Config) -> Self {
        let cache = Arc::new(ResultCache::from_config(&config.cache));
        Self::new(source, cache)
            .with_retries(config.source.retries)
            .with_max_row_limit(config.engine.max_row_limit)
    }

    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub const fn with_max_row_limit(mut self, max_row_limit: usize) -> Self {
        self.max_row_limit = max_row_limit;
        self
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    pub fn cache(&self) -> &ResultCache<CachedValue> {
        &self.cache
    }

    pub fn get_claims_summary(
        &self,
        filter: &FilterSpec,
        ctx: &RequestContext,
    ) -> Result<Arc<MetricsBundle>> {
        let key = self.key(QueryKind::ClaimsSummary, filter, None);
        let value = self.cache.get_or_compute(key, ctx, || {
            let started = Instant::now();
            let raw = self.with_retry("claims summary", ctx, || {
                Aggregator::new(self.source.as_ref()).claims(filter, ctx)
            })?;
            let bundle = compose_claims(raw, started.elapsed());
            log::info!(
                "claims summary computed: {} claims in {:?}",
                bundle.get("total_claims"),
                bundle.query_time()
            );
            Ok(CachedValue::Bundle(Arc::new(bundle)))
        })?;
        match value {
            CachedValue::Bundle(bundle) => Ok(bundle),
            other => Err(mismatch("claims bundle", &other)),
        }
    }

    pub fn get_policy_summary(
        &self,
        filter: &FilterSpec,
        ctx: &RequestContext,
    ) -> Result<Arc<MetricsBundle>> {
        let key = self.key(QueryKind::PolicySummary, filter, None);
        let value = self.cache.get_or_compute(key, ctx, || {
            let started = Instant::now();
            let raw = self.with_retry("policy summary", ctx, || {
                Aggregator::new(self.source.as_ref()).policy(filter, ctx)
            })?;
            let bundle = compose_policy(raw, started.elapsed());
            log::info!(
                "policy summary computed: {} policies in {:?}",
                bundle.get("total_policies"),
                bundle.query_time()
            );
            Ok(CachedValue::Bundle(Arc::new(bundle)))
        })?;
        match value {
            CachedValue::Bundle(bundle) => Ok(bundle),
            other => Err(mismatch("policy bundle", &other)),
        }
    }

    /// Eligible claim rows, newest snapshot first.
    pub fn get_claims_rows(
        &self,
        filter: &FilterSpec,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Arc<Vec<ClaimRow>>> {
        self.check_limit("limit", limit)?;
        let key = self.key(QueryKind::ClaimsRows, filter, Some(limit));
        let value = self.cache.get_or_compute(key, ctx, || {
            let rows = self.with_retry("claim rows", ctx, || {
                Aggregator::new(self.source.as_ref()).claim_rows(filter, limit, ctx)
            })?;
            Ok(CachedValue::Claims(Arc::new(rows)))
        })?;
        match value {
            CachedValue::Claims(rows) => Ok(rows),
            other => Err(mismatch("claim rows", &other)),
        }
    }

    /// Policy rows, highest annualized premium first.
    pub fn get_policy_rows(
        &self,
        filter: &FilterSpec,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Arc<Vec<PolicyRow>>> {
        self.check_limit("limit", limit)?;
        let key = self.key(QueryKind::PolicyRows, filter, Some(limit));
        let value = self.cache.get_or_compute(key, ctx, || {
            let rows = self.with_retry("policy rows", ctx, || {
                Aggregator::new(self.source.as_ref()).policy_rows(filter, limit, ctx)
            })?;
            Ok(CachedValue::Policies(Arc::new(rows)))
        })?;
        match value {
            CachedValue::Policies(rows) => Ok(rows),
            other => Err(mismatch("policy rows", &other)),
        }
    }

    /// Top `top_n` insured states by policy count.
    pub fn get_state_distribution(
        &self,
        filter: &FilterSpec,
        top_n: usize,
        ctx: &RequestContext,
    ) -> Result<Arc<Vec<StateDistribution>>> {
        self.check_limit("top_n", top_n)?;
        let key = self.key(QueryKind::StateDistribution, filter, Some(top_n));
        let value = self.cache.get_or_compute(key, ctx, || {
            let rows = self.with_retry("state distribution", ctx, || {
                Aggregator::new(self.source.as_ref()).state_distribution(filter, top_n, ctx)
            })?;
            Ok(CachedValue::States(Arc::new(rows)))
        })?;
        match value {
            CachedValue::States(rows) => Ok(rows),
            other => Err(mismatch("state distribution", &other)),
        }
    }

    /// Insights are recomputed on every call; they are never cached.
    pub fn get_insights(&self, bundle: &MetricsBundle, kind: BundleKind) -> Vec<Insight> {
        generate_insights(bundle, kind)
    }

    /// Both summaries (cached individually) plus the composite view.
    pub fn get_executive_summary(
        &self,
        filter: &FilterSpec,
        ctx: &RequestContext,
    ) -> Result<ExecutiveSummary> {
        let claims = self.get_claims_summary(filter, ctx)?;
        let policy = self.get_policy_summary(filter, ctx)?;
        Ok(ExecutiveSummary {
            composite: compose_executive(&claims, &policy),
            claims_insights: generate_insights(&claims, BundleKind::Claims),
            policy_insights: generate_insights(&policy, BundleKind::Policy),
            claims: claims.as_ref().clone(),
            policy: policy.as_ref().clone(),
        })
    }

    /// Drop every cached result for every source sharing this cache.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    fn key(&self, query: QueryKind, filter: &FilterSpec, limit: Option<usize>) -> CacheKey {
        CacheKey::new(self.source.source_id(), query, filter, limit)
    }

    fn check_limit(&self, field: &'static str, value: usize) -> Result<()> {
        if value == 0 || value > self.max_row_limit {
            return Err(LtcError::malformed(
                field,
                format!("{value} is outside 1..={}", self.max_row_limit),
            ));
        }
        Ok(())
    }

    /// Run `op`, retrying retryable failures at most `self.retries` times
    /// while the request is still live.
    fn with_retry<T>(
        &self,
        stage: &'static str,
        ctx: &RequestContext,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.is_retryable()
                        && attempt < self.retries
                        && !ctx.is_cancelled()
                        && !ctx.is_expired() =>
                {
                    attempt += 1;
                    log::warn!("{stage} failed: {err}; retry {attempt}/{}", self.retries);
                }
                Err(err) => return Err(err),
            }
        }
    }
}
