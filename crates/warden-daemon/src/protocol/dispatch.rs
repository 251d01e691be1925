//! Request dispatcher.
//!
//! Adapts wire requests to tree and token operations. Three gates run
//! before any mutating verb touches the tree:
//!
//! 1. **Read-only mode** rejects every mutation outright, without
//!    consulting the tree.
//! 2. **Authentication**: the bearer token must validate.
//! 3. **Authorization**: the claims must carry the verb's capability
//!    tag (or `GLOBAL_ROOT`); group-scoped verbs alternatively accept a
//!    requestor who is a member of the target group's managed-by group.
//!
//! Reads are open: fetches, searches, membership queries, and the
//! system endpoints take no token. Every record leaving through here
//! was already redacted by the tree.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use warden_core::context::OpContext;
use warden_core::errors::{Error, Result};
use warden_core::health::HealthRegistry;
use warden_core::kv::StoreCapability;
use warden_core::proto::Capability;
use warden_core::token::{Claims, TokenConfig, TokenService};
use warden_core::tree::{KeyOp, MetaOp, RuleOp, Tree};

use super::error::status_for;
use super::messages::{
    ClaimsReply, EntityList, GroupList, KeyActionKind, KeyList, NameList, PairList,
    RuleActionKind, Status, SubsystemReply, SystemStatusReply, TokenReply, UntypedMetaKind,
    WireRequest, WireResponse, wire_request, wire_response,
};

/// Per-request deadline propagated into the tree and token service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a verb is gated.
enum Gate {
    /// No token required.
    Open,
    /// Requires the capability (None means `GLOBAL_ROOT` only); a
    /// group-scoped verb may name a delegation target, and a
    /// self-scoped verb the entity allowed to act on itself.
    Mutating {
        capability: Option<Capability>,
        delegated_group: Option<String>,
        self_entity: Option<String>,
    },
    /// Proves itself with the old secret instead of a token.
    SelfService,
}

/// Stateless request handler shared by every connection.
pub struct Dispatcher {
    tree: Arc<Tree>,
    tokens: Arc<dyn TokenService>,
    token_config: TokenConfig,
    health: Arc<HealthRegistry>,
    readonly: bool,
}

impl Dispatcher {
    /// Builds a dispatcher over the assembled subsystems.
    #[must_use]
    pub fn new(
        tree: Arc<Tree>,
        tokens: Arc<dyn TokenService>,
        token_config: TokenConfig,
        health: Arc<HealthRegistry>,
        readonly: bool,
    ) -> Self {
        Self {
            tree,
            tokens,
            token_config,
            health,
            readonly,
        }
    }

    /// Whether mutating verbs are rejected outright.
    #[must_use]
    pub const fn readonly(&self) -> bool {
        self.readonly
    }

    /// Handles one request, always producing a response.
    #[must_use]
    pub fn handle(&self, request: WireRequest) -> WireResponse {
        let request_id = request.request_id;
        let ctx = OpContext::with_timeout(REQUEST_TIMEOUT);
        match self.dispatch(&ctx, request) {
            Ok(body) => WireResponse {
                request_id,
                status: Status::Ok as i32,
                message: String::new(),
                body,
            },
            Err(error) => {
                debug!(request_id, error = %error, "request failed");
                WireResponse {
                    request_id,
                    status: status_for(&error) as i32,
                    message: error.to_string(),
                    body: None,
                }
            }
        }
    }

    fn dispatch(
        &self,
        ctx: &OpContext,
        request: WireRequest,
    ) -> Result<Option<wire_response::Body>> {
        let body = request.body.ok_or(Error::MalformedRequest)?;

        match gate_for(&body) {
            Gate::Open => {}
            Gate::Mutating {
                capability,
                delegated_group,
                self_entity,
            } => {
                if self.readonly {
                    return Err(Error::ReadOnly);
                }
                self.authorize(
                    ctx,
                    &request.token,
                    capability,
                    delegated_group.as_deref(),
                    self_entity.as_deref(),
                )?;
            }
            Gate::SelfService => {
                if self.readonly {
                    return Err(Error::ReadOnly);
                }
            }
        }

        self.execute(ctx, body)
    }

    /// Token-based authorization for a mutating verb.
    fn authorize(
        &self,
        ctx: &OpContext,
        token: &str,
        capability: Option<Capability>,
        delegated_group: Option<&str>,
        self_entity: Option<&str>,
    ) -> Result<()> {
        let claims = self.tokens.validate(ctx, token)?;

        if claims.has_capability(Capability::GlobalRoot.as_tag()) {
            return Ok(());
        }
        if let Some(capability) = capability {
            if claims.has_capability(capability.as_tag()) {
                return Ok(());
            }
        }
        if self_entity.is_some_and(|id| id == claims.entity_id) {
            return Ok(());
        }
        // Delegation: members of the target group's managed-by group
        // may administer it without holding any capability tag.
        if let Some(group_name) = delegated_group {
            match self.tree.fetch_group(ctx, group_name) {
                Ok(group) if !group.managed_by.is_empty() => {
                    if self
                        .tree
                        .group_member_ids(&group.managed_by)
                        .contains(&claims.entity_id)
                    {
                        return Ok(());
                    }
                }
                Ok(_) | Err(Error::UnknownGroup) => {}
                Err(e) => return Err(e),
            }
        }
        Err(Error::RequestorUnqualified)
    }

    #[allow(clippy::too_many_lines)]
    fn execute(
        &self,
        ctx: &OpContext,
        body: wire_request::Body,
    ) -> Result<Option<wire_response::Body>> {
        use wire_request::Body;

        match body {
            Body::EntityCreate(req) => {
                self.tree.create_entity(ctx, &req.id, req.number, &req.secret)?;
                Ok(None)
            }
            Body::EntityFetch(req) => {
                let entity = self.tree.fetch_entity(ctx, &req.id)?;
                Ok(Some(wire_response::Body::Entity(entity)))
            }
            Body::EntityDestroy(req) => {
                self.tree.destroy_entity(ctx, &req.id)?;
                Ok(None)
            }
            Body::EntityLock(req) => {
                self.tree.lock_entity(ctx, &req.id)?;
                Ok(None)
            }
            Body::EntityUnlock(req) => {
                self.tree.unlock_entity(ctx, &req.id)?;
                Ok(None)
            }
            Body::EntitySetSecret(req) => {
                self.tree.set_entity_secret(ctx, &req.id, &req.secret)?;
                Ok(None)
            }
            Body::EntityMetaUpdate(req) => {
                let meta = req.meta.ok_or(Error::MalformedRequest)?;
                self.tree.update_entity_meta(ctx, &req.id, meta)?;
                Ok(None)
            }
            Body::EntityKeys(req) => {
                let op = key_op(req.action)?;
                let keys = self
                    .tree
                    .update_entity_keys(ctx, &req.id, op, &req.key_type, &req.value)?;
                Ok(Some(wire_response::Body::KeyList(KeyList { keys })))
            }
            Body::EntityUntypedMeta(req) => {
                let op = meta_op(req.action)?;
                let pairs = self
                    .tree
                    .manage_untyped_meta(ctx, &req.id, op, &req.key, &req.value)?;
                Ok(Some(wire_response::Body::PairList(PairList { pairs })))
            }
            Body::EntityGroups(req) => Ok(Some(wire_response::Body::NameList(NameList {
                names: self.tree.entity_group_names(&req.id),
            }))),
            Body::GroupCreate(req) => {
                self.tree.create_group(
                    ctx,
                    &req.name,
                    &req.display_name,
                    &req.managed_by,
                    req.number,
                )?;
                Ok(None)
            }
            Body::GroupFetch(req) => {
                let group = self.tree.fetch_group(ctx, &req.name)?;
                Ok(Some(wire_response::Body::Group(group)))
            }
            Body::GroupDestroy(req) => {
                self.tree.destroy_group(ctx, &req.name)?;
                Ok(None)
            }
            Body::GroupMetaUpdate(req) => {
                let delta = req.group.ok_or(Error::MalformedRequest)?;
                self.tree.update_group_meta(ctx, &req.name, delta)?;
                Ok(None)
            }
            Body::GroupRule(req) => {
                let op = rule_op(req.action)?;
                self.tree.modify_group_rule(ctx, &req.group, &req.target, op)?;
                Ok(None)
            }
            Body::GroupMembers(req) => {
                let entities = self.tree.group_members(ctx, &req.name)?;
                Ok(Some(wire_response::Body::EntityList(EntityList {
                    entities,
                })))
            }
            Body::Membership(req) => {
                if req.drop {
                    self.tree.remove_entity_from_group(ctx, &req.id, &req.group)?;
                } else {
                    self.tree.add_entity_to_group(ctx, &req.id, &req.group)?;
                }
                Ok(None)
            }
            Body::EntityCapability(req) => {
                if req.drop {
                    self.tree.drop_entity_capability(ctx, &req.id, &req.capability)?;
                } else {
                    self.tree.set_entity_capability(ctx, &req.id, &req.capability)?;
                }
                Ok(None)
            }
            Body::GroupCapability(req) => {
                if req.drop {
                    self.tree.drop_group_capability(ctx, &req.name, &req.capability)?;
                } else {
                    self.tree.set_group_capability(ctx, &req.name, &req.capability)?;
                }
                Ok(None)
            }
            Body::SearchEntities(req) => {
                let entities = self.tree.search_entities(&req.expression)?;
                Ok(Some(wire_response::Body::EntityList(EntityList {
                    entities,
                })))
            }
            Body::SearchGroups(req) => {
                let groups = self.tree.search_groups(&req.expression)?;
                Ok(Some(wire_response::Body::GroupList(GroupList { groups })))
            }
            Body::AuthEntity(req) => {
                self.tree.validate_entity_secret(ctx, &req.id, &req.secret)?;
                Ok(None)
            }
            Body::AuthGetToken(req) => {
                self.tree.validate_entity_secret(ctx, &req.id, &req.secret)?;
                let capabilities: Vec<String> = self
                    .tree
                    .entity_capabilities(ctx, &req.id)?
                    .into_iter()
                    .map(|c| c.as_tag().to_string())
                    .collect();
                let token = self.tokens.generate(
                    ctx,
                    Claims::identity(req.id, capabilities),
                    &self.token_config,
                )?;
                Ok(Some(wire_response::Body::Token(TokenReply { token })))
            }
            Body::AuthValidateToken(req) => {
                let claims = self.tokens.validate(ctx, &req.token)?;
                Ok(Some(wire_response::Body::Claims(claims_reply(claims))))
            }
            Body::AuthChangeSecret(req) => {
                self.tree
                    .validate_entity_secret(ctx, &req.id, &req.old_secret)?;
                self.tree.set_entity_secret(ctx, &req.id, &req.new_secret)?;
                Ok(None)
            }
            Body::SystemPing(_) => Ok(None),
            Body::SystemStatus(_) => {
                let status = self.health.check();
                Ok(Some(wire_response::Body::SystemStatus(SystemStatusReply {
                    healthy: status.healthy,
                    first_failure: status
                        .first_failure
                        .map(|s| s.name)
                        .unwrap_or_default(),
                    subsystems: status
                        .subsystems
                        .into_iter()
                        .map(|s| SubsystemReply {
                            name: s.name,
                            ok: s.ok,
                            status: s.status,
                        })
                        .collect(),
                })))
            }
            Body::SystemCapabilities(_) => {
                let mut names = Vec::new();
                if self
                    .tree
                    .store_capabilities()
                    .contains(&StoreCapability::Mutable)
                    && !self.readonly
                {
                    names.push("MUTABLE".to_string());
                } else {
                    names.push("READ_ONLY".to_string());
                }
                Ok(Some(wire_response::Body::NameList(NameList { names })))
            }
        }
    }
}

/// The gate for each verb.
fn gate_for(body: &wire_request::Body) -> Gate {
    use wire_request::Body;

    match body {
        Body::EntityCreate(_) => mutating(Some(Capability::CreateEntity), None, None),
        Body::EntityDestroy(_) => mutating(Some(Capability::DestroyEntity), None, None),
        Body::EntityLock(_) => mutating(Some(Capability::LockEntity), None, None),
        Body::EntityUnlock(_) => mutating(Some(Capability::UnlockEntity), None, None),
        Body::EntitySetSecret(_) => mutating(Some(Capability::ChangeEntitySecret), None, None),
        Body::EntityMetaUpdate(_) => mutating(Some(Capability::ModifyEntityMeta), None, None),
        Body::EntityKeys(req) if req.action != KeyActionKind::List as i32 => mutating(
            Some(Capability::ModifyEntityKeys),
            None,
            Some(req.id.clone()),
        ),
        Body::EntityUntypedMeta(req) if req.action != UntypedMetaKind::Read as i32 => {
            mutating(Some(Capability::ModifyEntityMeta), None, None)
        }
        Body::GroupCreate(_) => mutating(Some(Capability::CreateGroup), None, None),
        Body::GroupDestroy(_) => mutating(Some(Capability::DestroyGroup), None, None),
        Body::GroupMetaUpdate(req) => mutating(
            Some(Capability::ModifyGroupMeta),
            Some(req.name.clone()),
            None,
        ),
        Body::GroupRule(req) => mutating(
            Some(Capability::ModifyGroupMembers),
            Some(req.group.clone()),
            None,
        ),
        Body::Membership(req) => mutating(
            Some(Capability::ModifyGroupMembers),
            Some(req.group.clone()),
            None,
        ),
        // Capability grants are the root of the privilege lattice;
        // only GLOBAL_ROOT may touch them.
        Body::EntityCapability(_) | Body::GroupCapability(_) => mutating(None, None, None),
        Body::AuthChangeSecret(_) => Gate::SelfService,
        _ => Gate::Open,
    }
}

fn mutating(
    capability: Option<Capability>,
    delegated_group: Option<String>,
    self_entity: Option<String>,
) -> Gate {
    Gate::Mutating {
        capability,
        delegated_group,
        self_entity,
    }
}

fn key_op(raw: i32) -> Result<KeyOp> {
    match KeyActionKind::try_from(raw) {
        Ok(KeyActionKind::List) => Ok(KeyOp::List),
        Ok(KeyActionKind::Add) => Ok(KeyOp::Add),
        Ok(KeyActionKind::Del) => Ok(KeyOp::Del),
        Ok(KeyActionKind::Dropall) => Ok(KeyOp::DropAll),
        Err(_) => Err(Error::MalformedRequest),
    }
}

fn meta_op(raw: i32) -> Result<MetaOp> {
    match UntypedMetaKind::try_from(raw) {
        Ok(UntypedMetaKind::Read) => Ok(MetaOp::Read),
        Ok(UntypedMetaKind::Upsert) => Ok(MetaOp::Upsert),
        Ok(UntypedMetaKind::ClearFuzzy) => Ok(MetaOp::ClearFuzzy),
        Ok(UntypedMetaKind::ClearExact) => Ok(MetaOp::ClearExact),
        Err(_) => Err(Error::MalformedRequest),
    }
}

fn rule_op(raw: i32) -> Result<RuleOp> {
    match RuleActionKind::try_from(raw) {
        Ok(RuleActionKind::Include) => Ok(RuleOp::Include),
        Ok(RuleActionKind::Exclude) => Ok(RuleOp::Exclude),
        Ok(RuleActionKind::Drop) => Ok(RuleOp::Drop),
        Err(_) => Err(Error::MalformedRequest),
    }
}

fn claims_reply(claims: Claims) -> ClaimsReply {
    ClaimsReply {
        entity_id: claims.entity_id,
        capabilities: claims.capabilities,
        issued_at: claims.iat,
        not_before: claims.nbf,
        expires: claims.exp,
        issuer: claims.iss,
        subject: claims.sub,
        audience: claims.aud,
        token_id: claims.jti,
    }
}

/// Logs a startup summary once the dispatcher is assembled.
pub fn log_serving_mode(dispatcher: &Dispatcher) {
    if dispatcher.readonly() {
        warn!("serving in read-only mode; every mutating verb returns ReadOnly");
    } else {
        debug!("serving in read-write mode");
    }
}
