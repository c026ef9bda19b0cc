//! The scope evaluator (C3): evaluates option expressions against a
//! `(packet, lease, in_opts, out_opts)` quadruple and walks the
//! global → subnet → pool → class → host scope chain, writing into the
//! outbound option state.
//!
//! The configuration-file parser that would normally *produce* expression
//! trees is an external collaborator (out of scope, §1); this module
//! supplies the expression primitives it would call (`make_const_data`,
//! `make_concat`, `make_encapsulation`) plus the handful of packet-derived
//! references a YAML configuration can actually name.

use std::net::Ipv4Addr;

use crate::model::{Lease, Request};
use crate::store::{OptionState, SetOp, Universe};

/// An unevaluated option value. Constants and expressions are two cases of
/// the same type (§9 "coerced expression promotion"): promoting a constant
/// to support `append`/`prepend` is just wrapping it in `Concat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expression {
    Const(Vec<u8>),
    Concat(Vec<Expression>),
    /// Reference to another option already materialised in the outbound
    /// state, letting one statement build on another (`make_encapsulation`
    /// in the original collaborator list, generalised beyond vendor nesting).
    Reference(Universe, u8),
    ClientHostName,
    Giaddr,
    Ciaddr,
    LeaseIp,
    SubnetMask,
}

pub fn make_const_data(data: impl Into<Vec<u8>>) -> Expression {
    Expression::Const(data.into())
}

pub fn make_concat(first: Expression, second: Expression) -> Expression {
    match first {
        Expression::Concat(mut parts) => {
            parts.push(second);
            Expression::Concat(parts)
        }
        other => Expression::Concat(vec![other, second]),
    }
}

pub fn make_encapsulation(universe: Universe, code: u8) -> Expression {
    Expression::Reference(universe, code)
}

/// The context an expression is evaluated against. Pure with respect to
/// `request`/`lease`: evaluation never mutates inputs, only reads from them
/// and from the outbound state built up so far.
pub struct EvalContext<'a> {
    pub request: &'a Request,
    pub lease: Option<&'a Lease>,
    pub out_opts: &'a OptionState,
}

/// Evaluates an expression to a concrete byte string. Returns `None` when a
/// referenced field isn't present (e.g. a `ClientHostName` expression and
/// the client sent no hostname) — the caller treats that as "no value",
/// matching `evaluate_option_cache`'s "freshly allocated byte-string, or
/// nothing" contract.
pub fn evaluate(expr: &Expression, ctx: &EvalContext) -> Option<Vec<u8>> {
    match expr {
        Expression::Const(bytes) => Some(bytes.clone()),
        Expression::Concat(parts) => {
            let mut out = Vec::new();
            for part in parts {
                out.extend(evaluate(part, ctx)?);
            }
            Some(out)
        }
        Expression::Reference(universe, code) => {
            ctx.out_opts.get(*universe, *code).map(|v| v.to_vec())
        }
        Expression::ClientHostName => ctx
            .request
            .options
            .get(Universe::Dhcp, crate::wire::options::codes::HOST_NAME)
            .map(|v| v.to_vec()),
        Expression::Giaddr => Some(ctx.request.giaddr.octets().to_vec()),
        Expression::Ciaddr => Some(ctx.request.ciaddr.octets().to_vec()),
        Expression::LeaseIp => ctx.lease.map(|l| l.ip_addr.octets().to_vec()),
        // Resolved directly by the engine from the lease's subnet, not through
        // scope evaluation, since the evaluator has no subnet-table access.
        Expression::SubnetMask => None,
    }
}

/// A tri-state boolean expression result: `Ignore` lets a rule decline to
/// take a position (e.g. "this class doesn't apply"), distinct from an
/// explicit `false`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriBool {
    True,
    False,
    Ignore,
}

pub fn evaluate_boolean(expr: &Expression, ctx: &EvalContext) -> TriBool {
    match evaluate(expr, ctx) {
        Some(bytes) if bytes.first() == Some(&1) => TriBool::True,
        Some(_) => TriBool::False,
        None => TriBool::Ignore,
    }
}

/// Applies one scope's statements into `out_opts`, in list order. `default`
/// only takes effect if nothing is already present; everything else follows
/// the set-semantics table of C2.
///
/// Each statement is evaluated against the live `out_opts` as it stands
/// *after* every statement before it — not a frozen snapshot — so a later
/// statement's `Expression::Reference` can see what an earlier one (in
/// this scope or an ancestor scope) just wrote. The context is rebuilt
/// per statement: the immutable borrow it holds for `evaluate` ends
/// before the statement's own write to `out_opts`.
pub fn execute_statements(
    statements: &[crate::model::OptionStatement],
    request: &Request,
    lease: Option<&Lease>,
    out_opts: &mut OptionState,
) {
    for stmt in statements {
        let ctx = EvalContext {
            request,
            lease,
            out_opts,
        };

        let Some(value) = evaluate(&stmt.expr, &ctx) else {
            continue;
        };

        match stmt.op {
            SetOp::Default => out_opts.default(stmt.universe, stmt.code, value),
            SetOp::Supersede => out_opts.supersede(stmt.universe, stmt.code, value),
            SetOp::Append => out_opts.append(stmt.universe, stmt.code, value),
            SetOp::Prepend => out_opts.prepend(stmt.universe, stmt.code, value),
        }
    }
}

/// Scope application order for `ack_lease`/`dhcpinform`: global, subnet,
/// pool, classes (last-added first), host. Each group sees what the
/// previous groups in the chain already wrote into `out_opts`.
pub fn execute_scope_chain(
    groups: &[&crate::model::Group],
    request: &Request,
    lease: Option<&Lease>,
    out_opts: &mut OptionState,
) {
    for group in groups {
        execute_statements(&group.statements, request, lease, out_opts);
    }
}

/// `ack_lease` step 4 (§4.5): the lease's effective on_commit/on_expiry/
/// on_release lists are just every scope's own list, concatenated in the
/// same global-to-host order `execute_scope_chain` already walks for
/// ordinary option statements.
pub fn collect_lifecycle_statements(
    groups: &[&crate::model::Group],
) -> (
    Vec<crate::model::OptionStatement>,
    Vec<crate::model::OptionStatement>,
    Vec<crate::model::OptionStatement>,
) {
    let mut on_commit = Vec::new();
    let mut on_expiry = Vec::new();
    let mut on_release = Vec::new();

    for group in groups {
        on_commit.extend(group.on_commit.iter().cloned());
        on_expiry.extend(group.on_expiry.iter().cloned());
        on_release.extend(group.on_release.iter().cloned());
    }

    (on_commit, on_expiry, on_release)
}

/// Walks the `GroupSettings` inheritance chain top-down (global first),
/// producing the effective settings a handler consults.
pub fn effective_settings(groups: &[&crate::model::Group]) -> crate::model::GroupSettings {
    let mut effective = crate::model::GroupSettings::default();

    for group in groups {
        effective = group.settings.merge_over(&effective);
    }

    effective
}

pub fn subnet_mask_expr(mask: Ipv4Addr) -> Expression {
    Expression::Const(mask.octets().to_vec())
}
