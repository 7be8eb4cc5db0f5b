//! Identity state resolution
//!
//! Classifies a claimed identity state against the on-chain state registry:
//! current, superseded, or invalid. Registry reads are the only suspending
//! operations in the pipeline; each one is bounded by a timeout and by the
//! caller's cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::Zero;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::parse_decimal;
use crate::error::{DecodeError, InvalidState, RegistryError, StateError};
use crate::identity::Identifier;
use crate::types::ExtractedToken;

pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Transition record the registry keeps for every published state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionInfo {
    pub replaced_at_timestamp: u64,
    pub created_at_timestamp: u64,
    pub replaced_at_block: u64,
    pub created_at_block: u64,
    pub replaced_by: BigUint,
    pub id: BigUint,
}

/// Read access to the identity state registry contract.
#[async_trait]
pub trait StateRegistry: Send + Sync {
    /// Latest published state of `id`; zero if the identity never published.
    async fn latest_state(&self, id: &BigUint) -> Result<BigUint, RegistryError>;

    /// Transition record of `state`; an all-zero record if unknown.
    async fn transition_info(&self, state: &BigUint) -> Result<TransitionInfo, RegistryError>;
}

/// Decides whether `state` is the genesis state of `id`.
pub trait GenesisCheck: Send + Sync {
    fn is_genesis(&self, id: &Identifier, state: &BigUint) -> bool;
}

/// Genesis check by identifier derivation: the identifier's genesis must be
/// the one derived from `state`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenesisCheck;

impl GenesisCheck for IdGenesisCheck {
    fn is_genesis(&self, id: &Identifier, state: &BigUint) -> bool {
        Identifier::from_genesis_state(id.id_type(), state).is_ok_and(|derived| derived == *id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub created_at_block: u64,
    pub replaced_at_block: u64,
    pub created_at_timestamp: u64,
    pub replaced_at_timestamp: u64,
}

/// Outcome of one successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub latest: bool,
    pub state: BigUint,
    /// When the state was replaced, for superseded states
    pub transition_timestamp: Option<u64>,
    pub block: Option<BlockInfo>,
}

/// Identity and state to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTarget {
    pub id: BigUint,
    pub state: BigUint,
}

impl StateTarget {
    pub fn new(id: BigUint, state: BigUint) -> Self {
        Self { id, state }
    }
}

/// Per-call context: cancellation and an optional tighter timeout.
#[derive(Debug, Clone, Default)]
pub struct VerificationContext {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

impl VerificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Clone)]
pub struct StateResolver {
    registry: Arc<dyn StateRegistry>,
    genesis: Arc<dyn GenesisCheck>,
    timeout: Duration,
}

impl std::fmt::Debug for StateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateResolver")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StateResolver {
    pub fn new(registry: Arc<dyn StateRegistry>) -> Self {
        Self {
            registry,
            genesis: Arc::new(IdGenesisCheck),
            timeout: DEFAULT_RESOLUTION_TIMEOUT,
        }
    }

    pub fn with_genesis_check(mut self, genesis: Arc<dyn GenesisCheck>) -> Self {
        self.genesis = genesis;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        ctx: &VerificationContext,
        call: impl Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, StateError> {
        let timeout = ctx.timeout.map_or(self.timeout, |t| t.min(self.timeout));
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(StateError::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(value) => value.map_err(StateError::from),
                Err(_) => Err(StateError::Timeout),
            },
        }
    }

    /// Classify `target.state` for `target.id`.
    pub async fn resolve(
        &self,
        target: &StateTarget,
        ctx: &VerificationContext,
    ) -> Result<ResolvedState, StateError> {
        if ctx.cancel.is_cancelled() {
            return Err(StateError::Cancelled);
        }

        let latest = self.bounded(ctx, self.registry.latest_state(&target.id)).await?;

        if latest.is_zero() {
            let id = Identifier::from_int(&target.id)?;
            if !self.genesis.is_genesis(&id, &target.state) {
                debug!(id = %id, "state not published and not genesis");
                return Err(InvalidState::NotGenesisAndUnpublished.into());
            }
            debug!(id = %id, "genesis state");
            return Ok(ResolvedState {
                latest: true,
                state: target.state.clone(),
                transition_timestamp: None,
                block: None,
            });
        }

        if latest == target.state {
            debug!("state is latest");
            return Ok(ResolvedState {
                latest: true,
                state: target.state.clone(),
                transition_timestamp: None,
                block: None,
            });
        }

        let info = self
            .bounded(ctx, self.registry.transition_info(&target.state))
            .await?;
        if info.id.is_zero() {
            return Err(InvalidState::UnknownState.into());
        }
        if info.id != target.id {
            return Err(InvalidState::StateOwnedByOtherIdentity.into());
        }
        if info.replaced_at_timestamp == 0 {
            return Err(InvalidState::NoTransitionRecord.into());
        }

        debug!(
            replaced_at = info.replaced_at_timestamp,
            "state is historical"
        );
        Ok(ResolvedState {
            latest: false,
            state: target.state.clone(),
            transition_timestamp: Some(info.replaced_at_timestamp),
            block: Some(BlockInfo {
                created_at_block: info.created_at_block,
                replaced_at_block: info.replaced_at_block,
                created_at_timestamp: info.created_at_timestamp,
                replaced_at_timestamp: info.replaced_at_timestamp,
            }),
        })
    }

    /// Resolve the identity and state an extracted token carries.
    pub async fn resolve_token(
        &self,
        token: &ExtractedToken,
        ctx: &VerificationContext,
    ) -> Result<ResolvedState, StateError> {
        let id = token
            .id
            .as_deref()
            .ok_or_else(|| DecodeError::InvalidIdentifier("token carries no identifier".into()))?
            .parse::<Identifier>()?;
        let state = token
            .state
            .as_deref()
            .ok_or_else(|| DecodeError::InvalidNumeral("token carries no state".into()))?;
        let target = StateTarget::new(id.to_int(), parse_decimal(state)?);
        self.resolve(&target, ctx).await
    }
}
