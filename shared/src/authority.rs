//! Time-boxed grants that let the server accept part of a client-reported position.

use crate::math::Vec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_CLIENT_AUTH_GRANTS: usize = 8;

/// Per-source settings for client position authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientAuthParams {
    pub enabled: bool,
    /// Default grant duration in seconds.
    pub client_auth_time: f32,
    /// Beyond this distance the client position is only partially accepted.
    pub max_client_auth_distance: f32,
    /// At or beyond this distance the client position is rejected.
    pub reject_client_auth_distance: f32,
    pub priority: u8,
}

impl Default for ClientAuthParams {
    fn default() -> Self {
        Self {
            enabled: true,
            client_auth_time: 1.0,
            max_client_auth_distance: 250.0,
            reject_client_auth_distance: 1000.0,
            priority: 0,
        }
    }
}

pub type ClientAuthSources = HashMap<String, ClientAuthParams>;

/// One active grant.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientAuthData {
    pub source: String,
    pub time_remaining: f32,
    pub priority: u8,
    pub id: u32,
    /// Alpha produced the last time this grant decided an evaluation.
    pub alpha: f32,
    params: ClientAuthParams,
}

/// Thresholds averaged over every active grant sharing the top priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedAuthParams {
    pub client_auth_time: f32,
    pub max_distance: f32,
    pub reject_distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuthorityVerdict {
    /// No grant is active; normal server authority applies.
    NoAuthority,
    Accept {
        location: Vec3,
        alpha: f32,
        grant_id: u32,
    },
    /// The reported position is discarded entirely.
    Reject { distance: f32, grant_id: u32 },
}

impl AuthorityVerdict {
    pub fn alpha(&self) -> f32 {
        match self {
            AuthorityVerdict::Accept { alpha, .. } => *alpha,
            _ => 0.0,
        }
    }
}

/// Server-side stack of time-boxed grants, sorted by priority then recency.
#[derive(Debug, Clone)]
pub struct ClientAuthStack {
    sources: Arc<ClientAuthSources>,
    grants: Vec<ClientAuthData>,
    next_id: u32,
    rejections: u32,
}

impl ClientAuthStack {
    pub fn new(sources: Arc<ClientAuthSources>) -> Self {
        Self {
            sources,
            grants: Vec::with_capacity(MAX_CLIENT_AUTH_GRANTS),
            next_id: 0,
            rejections: 0,
        }
    }

    pub fn grants(&self) -> &[ClientAuthData] {
        &self.grants
    }

    pub fn has_authority(&self) -> bool {
        !self.grants.is_empty()
    }

    /// Number of reports rejected as too far from the server position.
    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Pushes a grant for `source`. Unconfigured or disabled sources are a no-op.
    pub fn grant(&mut self, source: &str, override_duration: Option<f32>) -> Option<u32> {
        let Some(params) = self.sources.get(source) else {
            warn!(
                "Client authority requested for unconfigured source '{}'",
                source
            );
            return None;
        };
        if !params.enabled {
            debug!("Client authority source '{}' is disabled", source);
            return None;
        }
        let duration = override_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(params.client_auth_time);
        if duration <= 0.0 {
            return None;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.grants.push(ClientAuthData {
            source: source.to_string(),
            time_remaining: duration,
            priority: params.priority,
            id,
            alpha: 1.0,
            params: params.clone(),
        });

        if self.grants.len() > MAX_CLIENT_AUTH_GRANTS {
            if let Some(oldest) = self
                .grants
                .iter()
                .enumerate()
                .min_by_key(|(_, g)| g.id)
                .map(|(i, _)| i)
            {
                let dropped = self.grants.remove(oldest);
                debug!("Dropped oldest client authority grant {}", dropped.id);
            }
        }
        self.grants
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(b.id.cmp(&a.id)));
        Some(id)
    }

    pub fn tick(&mut self, dt: f32) {
        for grant in &mut self.grants {
            grant.time_remaining -= dt;
        }
        self.grants.retain(|g| g.time_remaining > 0.0);
    }

    pub fn clear(&mut self) {
        self.grants.clear();
    }

    pub fn averaged_params(&self) -> Option<AveragedAuthParams> {
        let top = self.grants.first()?.priority;
        let peers: Vec<&ClientAuthParams> = self
            .grants
            .iter()
            .filter(|g| g.priority == top)
            .map(|g| &g.params)
            .collect();
        let n = peers.len() as f32;
        Some(AveragedAuthParams {
            client_auth_time: peers.iter().map(|p| p.client_auth_time).sum::<f32>() / n,
            max_distance: peers.iter().map(|p| p.max_client_auth_distance).sum::<f32>() / n,
            reject_distance: peers.iter().map(|p| p.reject_client_auth_distance).sum::<f32>() / n,
        })
    }

    /// Decides how much of `client_location` the server accepts.
    pub fn evaluate(
        &mut self,
        client_location: Vec3,
        server_location: Vec3,
        tolerance: f32,
    ) -> AuthorityVerdict {
        let Some(params) = self.averaged_params() else {
            return AuthorityVerdict::NoAuthority;
        };
        let Some(chosen) = self.grants.first_mut() else {
            return AuthorityVerdict::NoAuthority;
        };
        let grant_id = chosen.id;

        if client_location.equals(&server_location, tolerance) {
            chosen.alpha = 1.0;
            return AuthorityVerdict::Accept {
                location: client_location,
                alpha: 1.0,
                grant_id,
            };
        }

        let distance = client_location.distance(&server_location);
        if distance >= params.reject_distance {
            chosen.alpha = 0.0;
            self.rejections += 1;
            warn!(
                "Rejected client authority from '{}': reported position {:.1} units from server",
                chosen.source, distance
            );
            return AuthorityVerdict::Reject { distance, grant_id };
        }

        if distance >= params.max_distance {
            let alpha = params.max_distance / distance;
            chosen.alpha = alpha;
            return AuthorityVerdict::Accept {
                location: server_location.lerp(&client_location, alpha),
                alpha,
                grant_id,
            };
        }

        chosen.alpha = 1.0;
        AuthorityVerdict::Accept {
            location: client_location,
            alpha: 1.0,
            grant_id,
        }
    }
}

/// Client-side blend after a server-driven position write: moves `computed` toward
/// the client's own prediction by `alpha`.
pub fn blend_toward_prediction(computed: Vec3, predicted: Vec3, alpha: f32) -> Vec3 {
    computed.lerp(&predicted, alpha.clamp(0.0, 1.0))
}
