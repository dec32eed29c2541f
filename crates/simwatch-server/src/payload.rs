// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sand extraction payload.
//!
//! Setup locates the extraction layer by its tags and loads its geometry,
//! each simulated month is resolved to its calendar date, and the report
//! publishes one KPI per month describing the extraction areas.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use simwatch_core::client::Fields;
use simwatch_core::{
    CapabilitySet, EvictionReason, GameSessionInfo, HookError, Kpi, PhaseContext, SessionToken,
    SimulationHooks,
};
use tracing::{debug, info, warn};

pub const LAYER_LIST: &str = "/api/Layer/List";
pub const LAYER_META: &str = "/api/Layer/Meta";
pub const LAYER_GEOMETRY: &str = "/api/Layer/Get";
pub const SIMULATED_MONTH_DATE: &str = "/api/Game/GetActualDateForSimulatedMonth";

/// Name of the simulation this payload implements.
pub const SIMULATION_NAME: &str = "SandExtraction";

#[derive(Debug, Clone, Deserialize)]
struct LayerMeta {
    layer_id: i64,
    #[serde(default)]
    layer_name: String,
    #[serde(default)]
    layer_geotype: String,
    #[serde(default)]
    layer_type: Value,
}

impl LayerMeta {
    fn type_count(&self) -> usize {
        match &self.layer_type {
            Value::Object(types) => types.len(),
            Value::Array(types) => types.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LayerObject {
    #[serde(default)]
    id: i64,
    #[serde(default, rename = "type")]
    object_type: String,
}

#[derive(Debug, Deserialize)]
struct YearMonth {
    #[serde(default)]
    year: i32,
    #[serde(default)]
    month_of_year: i32,
}

#[derive(Debug, Clone)]
struct ExtractionLayer {
    name: String,
    type_count: usize,
    area_count: usize,
}

/// Hooks for the `SandExtraction` simulation.
pub struct ExtractionHooks {
    layer_tags: String,
    layers: DashMap<SessionToken, ExtractionLayer>,
    results: DashMap<(SessionToken, i32), Vec<Kpi>>,
}

impl ExtractionHooks {
    /// Create hooks looking for the layer tagged with `layer_tags`.
    pub fn new(layer_tags: impl Into<String>) -> Self {
        Self {
            layer_tags: layer_tags.into(),
            layers: DashMap::new(),
            results: DashMap::new(),
        }
    }

    /// Number of sessions with extraction state.
    pub fn session_count(&self) -> usize {
        self.layers.len()
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        ctx: &PhaseContext,
        endpoint: &str,
        fields: Fields,
    ) -> Result<T, HookError> {
        let payload = ctx.call(endpoint, &fields).await?;
        serde_json::from_value(payload)
            .map_err(|e| HookError::retryable(format!("Invalid {} response: {}", endpoint, e)))
    }
}

/// Accept only games whose config file is one of `names`.
pub fn accept_config_files(names: Vec<String>) -> impl Fn(&GameSessionInfo) -> bool + Send + Sync {
    move |info| names.iter().any(|name| *name == info.config_file_name)
}

#[async_trait]
impl SimulationHooks for ExtractionHooks {
    fn definitions(&self, _info: &GameSessionInfo, offered: &CapabilitySet) -> CapabilitySet {
        offered
            .definitions()
            .into_iter()
            .filter(|d| d.name == SIMULATION_NAME)
            .collect()
    }

    async fn setup(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        let fields = Fields::from([("layer_tags".to_string(), self.layer_tags.clone())]);
        let layers: Vec<LayerMeta> = Self::fetch(ctx, LAYER_LIST, fields).await?;
        let Some(layer) = layers.into_iter().next() else {
            return Err(HookError::retryable(format!(
                "Could not find layer with tags: {}",
                self.layer_tags
            )));
        };
        info!(
            session = %ctx.token,
            layer_id = layer.layer_id,
            layer = %layer.layer_name,
            geotype = %layer.layer_geotype,
            "Found extraction layer"
        );

        let layer_id = Fields::from([("layer_id".to_string(), layer.layer_id.to_string())]);
        let meta: LayerMeta = Self::fetch(ctx, LAYER_META, layer_id.clone()).await?;
        if meta.layer_id == 0 {
            return Err(HookError::retryable(format!(
                "Could not find layer data for layer id {}",
                layer.layer_id
            )));
        }

        let objects: Vec<LayerObject> = Self::fetch(ctx, LAYER_GEOMETRY, layer_id).await?;
        if objects.is_empty() {
            return Err(HookError::retryable(format!(
                "Could not find any layer geometry objects for layer with id {}",
                layer.layer_id
            )));
        }
        for object in &objects {
            debug!(session = %ctx.token, id = object.id, object_type = %object.object_type, "Layer object");
        }

        let type_count = meta.type_count();
        self.layers.insert(
            ctx.token.clone(),
            ExtractionLayer {
                name: meta.layer_name,
                type_count,
                area_count: objects.len(),
            },
        );
        self.results.retain(|(token, _), _| *token != ctx.token);
        Ok(())
    }

    async fn simulate(&self, ctx: &PhaseContext) -> Result<(), HookError> {
        let Some(layer) = self.layers.get(&ctx.token).map(|l| l.clone()) else {
            return Err(HookError::reset("Simulation entered before setup completed"));
        };

        let fields = Fields::from([("simulated_month".to_string(), ctx.month.to_string())]);
        let date: YearMonth = Self::fetch(ctx, SIMULATED_MONTH_DATE, fields).await?;
        if date.year == 0 {
            return Err(HookError::retryable(format!(
                "Could not find actual date for simulated month {}",
                ctx.month
            )));
        }

        let kpis = vec![
            Kpi::external(
                format!("Extraction areas {}", layer.name),
                layer.area_count as f64,
                "areas",
                ctx.month,
            ),
            Kpi::external(
                format!("Extraction area types {}", layer.name),
                layer.type_count as f64,
                "types",
                ctx.month,
            ),
        ];
        info!(
            session = %ctx.token,
            month = ctx.month,
            year = date.year,
            month_of_year = date.month_of_year,
            "Simulated month"
        );
        self.results
            .retain(|(token, month), _| *token != ctx.token || *month >= ctx.month);
        self.results.insert((ctx.token.clone(), ctx.month), kpis);
        Ok(())
    }

    async fn report(&self, ctx: &PhaseContext) -> Result<Vec<Kpi>, HookError> {
        // results stay until the session moves past the month or closes
        match self.results.get(&(ctx.token.clone(), ctx.month)) {
            Some(kpis) => Ok(kpis.value().clone()),
            None => {
                warn!(session = %ctx.token, month = ctx.month, "No results to report");
                Ok(Vec::new())
            }
        }
    }

    fn session_closed(&self, token: &SessionToken, reason: &EvictionReason) {
        debug!(session = %token, %reason, "Dropping extraction state");
        self.layers.remove(token);
        self.results.retain(|(owner, _), _| owner != token);
    }
}

impl std::fmt::Debug for ExtractionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionHooks")
            .field("layer_tags", &self.layer_tags)
            .field("sessions", &self.session_count())
            .finish()
    }
}
