//! The flow-sensitive analysis pass
//!
//! One forward walk over a function body threads a [`StateMap`] through the
//! statements, records a [`NodeFacts`] entry for every expression node and
//! fills the function's [`BindingTable`]. When a read observed a variable
//! with a facet the variable no longer has by the end of the walk, the walk
//! is repeated with those variables pinned to boxed storage.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use phpeval_core::ast::{
    BinaryOp, Expr, ExprKind, FunctionDef, NodeId, Param, Program, Stmt, MAIN_FUNCTION,
};

use crate::binding::{BindingTable, VarId};
use crate::config::AnalyzeConfig;
use crate::facet::TypeFacet;
use crate::info::{FunctionInfo, NodeFacts};
use crate::issue::Issue;
use crate::logging;
use crate::program::{argument_modes, CalleeOracle};
use crate::state::{StateMap, VarState};

/// A body to analyze: a user function or a program's main statements
#[derive(Debug, Clone, Copy)]
pub struct FunctionBody<'a> {
    pub name: &'a str,
    pub params: &'a [Param],
    pub body: &'a [Stmt],
    /// Top-level code, whose variables are all global
    pub is_main: bool,
}

impl<'a> FunctionBody<'a> {
    pub fn of(def: &'a FunctionDef) -> Self {
        Self {
            name: &def.name,
            params: &def.params,
            body: &def.body,
            is_main: false,
        }
    }

    pub fn main(program: &'a Program) -> Self {
        Self {
            name: MAIN_FUNCTION,
            params: &[],
            body: &program.main,
            is_main: true,
        }
    }
}

/// Analyze one function, restarting until no read facet goes stale
pub fn analyze_function(
    function: FunctionBody<'_>,
    config: &AnalyzeConfig,
    oracle: &dyn CalleeOracle,
) -> FunctionInfo {
    logging::log_function_start(function.name, function.params.len());

    let mut pinned: HashSet<String> = HashSet::new();
    let mut dynamic = false;
    let mut restarts = 0;
    loop {
        let mut pass = Pass::new(function, config, oracle, &pinned, dynamic);
        pass.run();

        let modified: Vec<String> = pass
            .table
            .modified()
            .into_iter()
            .map(|id| pass.table.get(id).name.clone())
            .filter(|name| !pinned.contains(name))
            .collect();
        if modified.is_empty() {
            return pass.finish(restarts);
        }

        restarts += 1;
        dynamic = pass.table.uses_dynamic_scope();
        let boxed = if restarts > config.max_restarts {
            // Box every variable; nothing can go stale after that
            pass.table.iter().map(|b| b.name.clone()).collect()
        } else {
            modified
        };
        drop(pass);
        logging::log_restart(function.name, restarts, &boxed);
        pinned.extend(boxed);
    }
}

#[derive(Debug, Default)]
struct LoopFrame {
    breaks: Option<StateMap>,
    continues: Option<StateMap>,
}

/// The pieces of a loop statement in execution order
struct LoopParts<'s> {
    pre_test: &'s [Expr],
    foreach: Option<ForeachTargets<'s>>,
    body: &'s [Stmt],
    step: &'s [Expr],
    post_test: &'s [Expr],
}

#[derive(Clone, Copy)]
struct ForeachTargets<'s> {
    key: Option<&'s Expr>,
    value: &'s Expr,
    by_ref: bool,
}

/// A non-quiet variable read reachable in a statically scoped region
struct ReadSite {
    name: String,
    line: u32,
}

struct Pass<'a> {
    function: FunctionBody<'a>,
    config: &'a AnalyzeConfig,
    oracle: &'a dyn CalleeOracle,
    pinned: &'a HashSet<String>,
    table: BindingTable,
    facts: HashMap<NodeId, NodeFacts>,
    reads: BTreeMap<NodeId, ReadSite>,
    loops: Vec<LoopFrame>,
    params: Vec<VarId>,
    issues: Vec<Issue>,
}

impl<'a> Pass<'a> {
    fn new(
        function: FunctionBody<'a>,
        config: &'a AnalyzeConfig,
        oracle: &'a dyn CalleeOracle,
        pinned: &'a HashSet<String>,
        dynamic: bool,
    ) -> Self {
        let mut table = BindingTable::new();
        if dynamic {
            table.mark_uses_dynamic_scope();
        }
        Self {
            function,
            config,
            oracle,
            pinned,
            table,
            facts: HashMap::new(),
            reads: BTreeMap::new(),
            loops: Vec::new(),
            params: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn run(&mut self) {
        let mut state = StateMap::new();
        for (index, param) in self.function.params.iter().enumerate() {
            let id = self.lookup(&param.name);
            self.table.mark_argument(id, index, param.by_ref);
            state.set(id, VarState::Valid);
            self.params.push(id);
        }
        let body = self.function.body;
        self.block(body, &mut state);
    }

    fn finish(mut self, restarts: u32) -> FunctionInfo {
        self.table.seal();
        logging::log_storage(self.function.name, &self.table);

        let name = self.function.name;
        for (node, site) in &self.reads {
            let state = self
                .facts
                .get(node)
                .map(|f| f.state)
                .unwrap_or(VarState::Uninitialized);
            match state {
                VarState::Unset => self
                    .issues
                    .push(Issue::undefined_variable(&site.name, name, site.line)),
                VarState::Unknown if self.config.report_maybe_undefined => self
                    .issues
                    .push(Issue::maybe_undefined_variable(&site.name, name, site.line)),
                _ => {}
            }
        }

        let mut info = FunctionInfo::new(
            name.to_string(),
            self.function.is_main,
            self.table,
            self.params,
            self.facts,
        );
        info.issues = self.issues;
        info.restarts = restarts;
        info
    }

    fn lookup(&mut self, name: &str) -> VarId {
        let id = self.table.lookup(name);
        if self.function.is_main {
            self.table.mark_global(id);
        }
        if self.pinned.contains(name) {
            self.table.pin(id);
        }
        id
    }

    fn note(&mut self, node: NodeId, facet: TypeFacet, state: VarState, var: Option<VarId>) {
        match self.facts.entry(node) {
            Entry::Occupied(mut entry) => {
                let facts = entry.get_mut();
                facts.facet = facts.facet.join(facet);
                facts.state = facts.state.merge(state);
                if facts.var.is_none() {
                    facts.var = var;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(NodeFacts { facet, state, var });
            }
        }
    }

    fn record(&mut self, e: &Expr, facet: TypeFacet) -> TypeFacet {
        self.note(e.id, facet, VarState::Uninitialized, None);
        facet
    }

    fn record_var(&mut self, e: &Expr, facet: TypeFacet, state: VarState, id: VarId) -> TypeFacet {
        self.note(e.id, facet, state, Some(id));
        facet
    }

    /// The scope was read or written by name
    fn dynamic_access(&mut self, st: &mut StateMap) {
        self.table.mark_uses_dynamic_scope();
        st.invalidate();
    }

    // ==================== Statements ====================

    fn block(&mut self, stmts: &[Stmt], st: &mut StateMap) {
        for stmt in stmts {
            self.stmt(stmt, st);
        }
    }

    fn stmt(&mut self, stmt: &Stmt, st: &mut StateMap) {
        match stmt {
            Stmt::Expr(e) => {
                self.expr(e, st);
            }
            Stmt::Echo(exprs) => {
                for e in exprs {
                    self.expr(e, st);
                }
            }
            Stmt::Block(body) => self.block(body, st),
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                self.expr(test, st);
                let mut then_state = st.clone();
                self.block(then, &mut then_state);
                let mut else_state = st.clone();
                self.block(otherwise, &mut else_state);
                then_state.merge(&else_state);
                *st = then_state;
            }
            Stmt::While { test, body } => self.loop_stmt(
                LoopParts {
                    pre_test: std::slice::from_ref(test),
                    foreach: None,
                    body,
                    step: &[],
                    post_test: &[],
                },
                st,
            ),
            Stmt::DoWhile { body, test } => self.loop_stmt(
                LoopParts {
                    pre_test: &[],
                    foreach: None,
                    body,
                    step: &[],
                    post_test: std::slice::from_ref(test),
                },
                st,
            ),
            Stmt::For {
                init,
                test,
                step,
                body,
            } => {
                for e in init {
                    self.expr(e, st);
                }
                self.loop_stmt(
                    LoopParts {
                        pre_test: test,
                        foreach: None,
                        body,
                        step,
                        post_test: &[],
                    },
                    st,
                )
            }
            Stmt::Foreach {
                subject,
                key,
                value,
                by_ref,
                body,
            } => {
                if *by_ref {
                    self.reference(subject, st);
                } else {
                    self.expr(subject, st);
                }
                self.loop_stmt(
                    LoopParts {
                        pre_test: &[],
                        foreach: Some(ForeachTargets {
                            key: key.as_ref(),
                            value,
                            by_ref: *by_ref,
                        }),
                        body,
                        step: &[],
                        post_test: &[],
                    },
                    st,
                )
            }
            Stmt::Break { depth } => self.jump(*depth, true, st),
            Stmt::Continue { depth } => self.jump(*depth, false, st),
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, st);
                }
                st.mark_unreachable();
            }
            Stmt::Unset(targets) => {
                for target in targets {
                    self.unset(target, st);
                }
            }
            Stmt::Global(names) => {
                for name in names {
                    let id = self.lookup(name);
                    self.table.mark_global(id);
                    st.set(id, VarState::Valid);
                }
            }
        }
    }

    /// Discovery pass, merge into the entry state, then the real pass
    fn loop_stmt(&mut self, parts: LoopParts<'_>, st: &mut StateMap) {
        let mut discovery = st.clone();
        self.iteration(&parts, &mut discovery);

        let mut real = st.clone();
        real.merge(&discovery);
        let (exit, breaks) = self.iteration(&parts, &mut real);

        let mut after = StateMap::unreachable();
        if let Some(exit) = exit {
            after.merge(&exit);
            after.merge(&real);
        }
        if let Some(breaks) = breaks {
            after.merge(&breaks);
        }
        *st = after;
    }

    /// One iteration; returns the state where the loop condition fails, if
    /// the loop has one, and the merged `break` states
    fn iteration(
        &mut self,
        parts: &LoopParts<'_>,
        st: &mut StateMap,
    ) -> (Option<StateMap>, Option<StateMap>) {
        let mut exit = None;
        for test in parts.pre_test {
            self.expr(test, st);
        }
        if !parts.pre_test.is_empty() || parts.foreach.is_some() {
            exit = Some(st.clone());
        }
        if let Some(targets) = parts.foreach {
            if targets.by_ref {
                self.reference(targets.value, st);
            } else {
                self.assign(targets.value, None, TypeFacet::Value, st);
            }
            if let Some(key) = targets.key {
                self.assign(key, None, TypeFacet::Value, st);
            }
        }

        self.loops.push(LoopFrame::default());
        self.block(parts.body, st);
        let frame = self.loops.pop().unwrap_or_default();
        if let Some(continues) = &frame.continues {
            st.merge(continues);
        }

        for step in parts.step {
            self.expr(step, st);
        }
        for test in parts.post_test {
            self.expr(test, st);
        }
        if !parts.post_test.is_empty() {
            exit = Some(st.clone());
        }
        (exit, frame.breaks)
    }

    fn jump(&mut self, depth: u32, is_break: bool, st: &mut StateMap) {
        let depth = depth.max(1) as usize;
        match self.loops.len().checked_sub(depth) {
            Some(index) => {
                let frame = &mut self.loops[index];
                let target = if is_break {
                    &mut frame.breaks
                } else {
                    &mut frame.continues
                };
                let merged = match target.take() {
                    Some(mut merged) => {
                        merged.merge(st);
                        merged
                    }
                    None => st.clone(),
                };
                *target = Some(merged);
            }
            None => {
                let keyword = if is_break { "break" } else { "continue" };
                let issue = Issue::jump_outside_loop(keyword, self.function.name);
                // loop bodies are walked twice
                if !self.issues.contains(&issue) {
                    self.issues.push(issue);
                }
            }
        }
        st.mark_unreachable();
    }

    // ==================== Expressions ====================

    fn expr(&mut self, e: &Expr, st: &mut StateMap) -> TypeFacet {
        match &e.kind {
            ExprKind::Literal(literal) => self.record(e, TypeFacet::of_literal(literal)),
            ExprKind::Var(name) => self.read_var(e, name, st, false),
            ExprKind::VarVar(name) => {
                self.expr(name, st);
                self.dynamic_access(st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::This => self.record(e, TypeFacet::Value),
            ExprKind::Binary { op, left, right } => self.binary(e, *op, left, right, st),
            ExprKind::Unary { op, expr } => {
                let operand = self.expr(expr, st);
                self.record(e, TypeFacet::unary(*op, operand))
            }
            ExprKind::Concat(chain) => {
                for part in chain.parts() {
                    self.expr(part, st);
                }
                self.record(e, TypeFacet::String)
            }
            ExprKind::ArrayLiteral(items) => {
                for item in items {
                    if let Some(key) = &item.key {
                        self.expr(key, st);
                    }
                    if item.by_ref {
                        self.reference(&item.value, st);
                    } else {
                        self.expr(&item.value, st);
                    }
                }
                self.record(e, TypeFacet::Value)
            }
            ExprKind::ArrayGet { base, index } => {
                self.expr(base, st);
                self.expr(index, st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::ArrayTail { base } | ExprKind::FieldGet { base, .. } => {
                self.expr(base, st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.expr(receiver, st);
                let modes = argument_modes(None, args);
                self.arguments(args, &modes, st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::Call { name, args } => {
                let signature = self.oracle.signature(name);
                let modes = argument_modes(signature.as_ref(), args);
                self.arguments(args, &modes, st);
                let caller_scope = self.config.is_dynamic_scope_function(name)
                    || signature.is_some_and(|s| s.uses_caller_scope);
                if caller_scope {
                    self.dynamic_access(st);
                }
                self.record(e, TypeFacet::Value)
            }
            ExprKind::Assign { target, value } => {
                let facet = self.assign(target, Some(value), TypeFacet::Value, st);
                self.record(e, facet)
            }
            ExprKind::AssignRef { target, value } => {
                self.reference(value, st);
                self.reference(target, st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::AssignOp { op, target, value } => self.compound(e, *op, target, value, st),
            ExprKind::Conditional {
                test,
                then,
                otherwise,
            } => {
                let test_facet = self.expr(test, st);
                let mut then_state = st.clone();
                let then_facet = match then {
                    Some(then) => self.expr(then, &mut then_state),
                    None => test_facet,
                };
                let mut else_state = st.clone();
                let else_facet = self.expr(otherwise, &mut else_state);
                then_state.merge(&else_state);
                *st = then_state;
                self.record(e, then_facet.join(else_facet))
            }
            ExprKind::List { head, value } => {
                let facet = self.expr(value, st);
                for item in head.items.iter().flatten() {
                    if let Some(key) = &item.key {
                        self.expr(key, st);
                    }
                    self.assign(&item.target, None, TypeFacet::Value, st);
                }
                self.record(e, facet)
            }
            ExprKind::IncDec { target, prefix, .. } => self.inc_dec(e, target, *prefix, st),
            ExprKind::Suppress(inner) => {
                let facet = self.expr(inner, st);
                self.record(e, facet)
            }
            ExprKind::Cast { kind, expr } => {
                self.expr(expr, st);
                self.record(e, TypeFacet::of_cast(*kind))
            }
            ExprKind::Isset(exprs) => {
                for x in exprs {
                    self.quiet(x, st);
                }
                self.record(e, TypeFacet::Boolean)
            }
            ExprKind::Empty(x) => {
                self.quiet(x, st);
                self.record(e, TypeFacet::Boolean)
            }
        }
    }

    fn arguments(&mut self, args: &[Expr], modes: &[bool], st: &mut StateMap) {
        for (arg, by_ref) in args.iter().zip(modes) {
            if *by_ref {
                self.reference(arg, st);
            } else {
                self.expr(arg, st);
            }
        }
    }

    fn read_var(&mut self, e: &Expr, name: &str, st: &mut StateMap, quiet: bool) -> TypeFacet {
        let id = self.lookup(name);
        let state = st.get(id);
        if !state.is_valid() {
            self.table.mark_needs_value(id);
            if !quiet && st.is_reachable() && !st.is_dynamic() {
                self.reads.entry(e.id).or_insert_with(|| ReadSite {
                    name: name.to_string(),
                    line: e.line,
                });
            }
        }
        let facet = self.table.record_read(id);
        self.record_var(e, facet, state, id)
    }

    /// Analyze in `isset` context: undefined variables are not reported
    fn quiet(&mut self, e: &Expr, st: &mut StateMap) -> TypeFacet {
        match &e.kind {
            ExprKind::Var(name) => self.read_var(e, name, st, true),
            ExprKind::ArrayGet { base, index } => {
                self.quiet(base, st);
                self.expr(index, st);
                self.record(e, TypeFacet::Value)
            }
            ExprKind::FieldGet { base, .. } => {
                self.quiet(base, st);
                self.record(e, TypeFacet::Value)
            }
            _ => self.expr(e, st),
        }
    }

    fn binary(
        &mut self,
        e: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        st: &mut StateMap,
    ) -> TypeFacet {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                self.expr(left, st);
                let mut rhs = st.clone();
                self.expr(right, &mut rhs);
                st.merge(&rhs);
                self.record(e, TypeFacet::Boolean)
            }
            BinaryOp::Coalesce => {
                let left_facet = self.quiet(left, st);
                let mut rhs = st.clone();
                let right_facet = self.expr(right, &mut rhs);
                st.merge(&rhs);
                self.record(e, left_facet.join(right_facet))
            }
            _ => {
                let left_facet = self.expr(left, st);
                let right_facet = self.expr(right, st);
                self.record(e, TypeFacet::binary(op, left_facet, right_facet))
            }
        }
    }

    /// A store into `target`; `value`, when given, is analyzed after the
    /// target's place, otherwise `facet` describes the stored value
    fn assign(
        &mut self,
        target: &Expr,
        value: Option<&Expr>,
        facet: TypeFacet,
        st: &mut StateMap,
    ) -> TypeFacet {
        match &target.kind {
            ExprKind::Var(name) => {
                let facet = match value {
                    Some(value) => self.expr(value, st),
                    None => facet,
                };
                let id = self.lookup(name);
                let prior = st.get(id);
                self.table.mark_assigned(id, facet);
                st.set(id, VarState::Valid);
                let stored = self.table.effective_facet(id);
                self.record_var(target, stored, prior, id);
                facet
            }
            ExprKind::VarVar(name) => {
                self.expr(name, st);
                let facet = match value {
                    Some(value) => self.expr(value, st),
                    None => facet,
                };
                self.dynamic_access(st);
                self.record(target, TypeFacet::Value);
                facet
            }
            ExprKind::ArrayGet { base, index } => {
                self.container(base, st);
                self.expr(index, st);
                let facet = match value {
                    Some(value) => self.expr(value, st),
                    None => facet,
                };
                self.record(target, TypeFacet::Value);
                facet
            }
            ExprKind::ArrayTail { base } | ExprKind::FieldGet { base, .. } => {
                self.container(base, st);
                let facet = match value {
                    Some(value) => self.expr(value, st),
                    None => facet,
                };
                self.record(target, TypeFacet::Value);
                facet
            }
            _ => {
                self.expr(target, st);
                match value {
                    Some(value) => self.expr(value, st),
                    None => facet,
                }
            }
        }
    }

    /// `base` is used as an array or object container and may be vivified
    fn container(&mut self, e: &Expr, st: &mut StateMap) {
        match &e.kind {
            ExprKind::Var(name) => {
                let id = self.lookup(name);
                let prior = st.get(id);
                self.table.mark_needs_value(id);
                self.table.mark_assigned(id, TypeFacet::Value);
                st.set(id, VarState::Valid);
                self.record_var(e, TypeFacet::Value, prior, id);
            }
            ExprKind::VarVar(name) => {
                self.expr(name, st);
                self.dynamic_access(st);
                self.record(e, TypeFacet::Value);
            }
            ExprKind::ArrayGet { base, index } => {
                self.container(base, st);
                self.expr(index, st);
                self.record(e, TypeFacet::Value);
            }
            ExprKind::ArrayTail { base } | ExprKind::FieldGet { base, .. } => {
                self.container(base, st);
                self.record(e, TypeFacet::Value);
            }
            _ => {
                self.expr(e, st);
            }
        }
    }

    /// `e` is bound to an alias cell
    fn reference(&mut self, e: &Expr, st: &mut StateMap) {
        match &e.kind {
            ExprKind::Var(name) => {
                let id = self.lookup(name);
                let prior = st.get(id);
                self.table.mark_aliased(id);
                self.table.mark_assigned(id, TypeFacet::Value);
                st.set(id, VarState::Valid);
                self.record_var(e, TypeFacet::Value, prior, id);
            }
            ExprKind::VarVar(_)
            | ExprKind::ArrayGet { .. }
            | ExprKind::ArrayTail { .. }
            | ExprKind::FieldGet { .. } => self.container(e, st),
            _ => {
                self.expr(e, st);
            }
        }
    }

    fn compound(
        &mut self,
        e: &Expr,
        op: BinaryOp,
        target: &Expr,
        value: &Expr,
        st: &mut StateMap,
    ) -> TypeFacet {
        if op == BinaryOp::Coalesce {
            // a quiet read, then a store only when the target is not set
            let current = self.quiet(target, st);
            let mut rhs = st.clone();
            let operand = self.assign(target, Some(value), TypeFacet::Value, &mut rhs);
            st.merge(&rhs);
            if let ExprKind::Var(name) = &target.kind {
                let id = self.lookup(name);
                st.set(id, VarState::Valid);
            }
            return self.record(e, current.join(operand));
        }
        let result = match &target.kind {
            ExprKind::Var(name) => {
                let current = self.expr(target, st);
                let operand = self.expr(value, st);
                let result = TypeFacet::binary(op, current, operand);
                let id = self.lookup(name);
                self.table.mark_assigned(id, result);
                st.set(id, VarState::Valid);
                result
            }
            ExprKind::VarVar(name) => {
                self.expr(name, st);
                let operand = self.expr(value, st);
                self.dynamic_access(st);
                self.record(target, TypeFacet::Value);
                TypeFacet::binary(op, TypeFacet::Value, operand)
            }
            ExprKind::ArrayGet { .. } | ExprKind::ArrayTail { .. } | ExprKind::FieldGet { .. } => {
                self.container(target, st);
                let operand = self.expr(value, st);
                TypeFacet::binary(op, TypeFacet::Value, operand)
            }
            _ => {
                self.expr(target, st);
                self.expr(value, st);
                TypeFacet::Value
            }
        };
        self.record(e, result)
    }

    fn inc_dec(&mut self, e: &Expr, target: &Expr, prefix: bool, st: &mut StateMap) -> TypeFacet {
        match &target.kind {
            ExprKind::Var(name) => {
                let current = self.expr(target, st);
                let stepped = current.stepped();
                let id = self.lookup(name);
                self.table.mark_assigned(id, stepped);
                st.set(id, VarState::Valid);
                self.record(e, if prefix { stepped } else { current })
            }
            _ => {
                self.container(target, st);
                self.record(e, TypeFacet::Value)
            }
        }
    }

    fn unset(&mut self, e: &Expr, st: &mut StateMap) {
        match &e.kind {
            ExprKind::Var(name) => {
                let id = self.lookup(name);
                let prior = st.get(id);
                st.set(id, VarState::Unset);
                let facet = self.table.effective_facet(id);
                self.record_var(e, facet, prior, id);
            }
            ExprKind::VarVar(name) => {
                self.expr(name, st);
                self.dynamic_access(st);
                self.record(e, TypeFacet::Value);
            }
            ExprKind::ArrayGet { base, index } => {
                self.unset_base(base, st);
                self.expr(index, st);
                self.record(e, TypeFacet::Value);
            }
            ExprKind::FieldGet { base, .. } => {
                self.unset_base(base, st);
                self.record(e, TypeFacet::Value);
            }
            _ => {
                self.expr(e, st);
            }
        }
    }

    /// Container of an element being unset: walked but never vivified
    fn unset_base(&mut self, e: &Expr, st: &mut StateMap) {
        match &e.kind {
            ExprKind::Var(name) => {
                let id = self.lookup(name);
                let prior = st.get(id);
                self.table.mark_needs_value(id);
                self.record_var(e, TypeFacet::Value, prior, id);
            }
            ExprKind::ArrayGet { base, index } => {
                self.unset_base(base, st);
                self.expr(index, st);
                self.record(e, TypeFacet::Value);
            }
            ExprKind::FieldGet { base, .. } => {
                self.unset_base(base, st);
                self.record(e, TypeFacet::Value);
            }
            _ => {
                self.quiet(e, st);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::StorageClass;
    use crate::issue::Severity;
    use crate::program::{CalleeSignature, SignatureTable};
    use phpeval_core::ExprFactory;

    fn analyze(params: Vec<Param>, body: Vec<Stmt>) -> FunctionInfo {
        analyze_with(params, body, &SignatureTable::new())
    }

    fn analyze_with(params: Vec<Param>, body: Vec<Stmt>, oracle: &SignatureTable) -> FunctionInfo {
        let def = FunctionDef::new("f", params, body);
        analyze_function(FunctionBody::of(&def), &AnalyzeConfig::default(), oracle)
    }

    fn assign(f: &mut ExprFactory, name: &str, value: Expr) -> Stmt {
        let target = f.var(name);
        Stmt::Expr(f.assign(target, value))
    }

    fn storage(info: &FunctionInfo, name: &str) -> StorageClass {
        info.storage_of(name).unwrap()
    }

    #[test]
    fn test_copy_keeps_primitive_storage() {
        // $a = 1; $b = $a; $b = 2;
        let mut f = ExprFactory::new();
        let one = f.long(1);
        let a = f.var("a");
        let two = f.long(2);
        let body = vec![assign(&mut f, "a", one), assign(&mut f, "b", a), assign(&mut f, "b", two)];
        let info = analyze(vec![], body);
        assert_eq!(storage(&info, "a"), StorageClass::PrimitiveLong);
        assert_eq!(storage(&info, "b"), StorageClass::PrimitiveLong);
        assert!(info.issues.is_empty());
    }

    #[test]
    fn test_reference_assignment_aliases_both_sides() {
        // $a = 1; $b = &$a; $b = 2;
        let mut f = ExprFactory::new();
        let one = f.long(1);
        let b = f.var("b");
        let a = f.var("a");
        let bind = f.assign_ref(b, a);
        let two = f.long(2);
        let body = vec![assign(&mut f, "a", one), Stmt::Expr(bind), assign(&mut f, "b", two)];
        let info = analyze(vec![], body);
        assert_eq!(storage(&info, "a"), StorageClass::AliasCell);
        assert_eq!(storage(&info, "b"), StorageClass::AliasCell);
    }

    #[test]
    fn test_conditional_definition_is_unknown() {
        // if ($cond) { $x = 1; } echo $x;
        let mut f = ExprFactory::new();
        let cond = f.var("cond");
        let one = f.long(1);
        let then = vec![assign(&mut f, "x", one)];
        let x = f.var("x");
        let read_id = x.id;
        let body = vec![
            Stmt::If {
                test: cond,
                then,
                otherwise: vec![],
            },
            Stmt::Echo(vec![x]),
        ];
        let info = analyze(vec![Param::new("cond")], body);

        assert_eq!(info.state(read_id), VarState::Unknown);
        assert_eq!(info.facet(read_id), Ok(TypeFacet::Value));
        assert_eq!(storage(&info, "x"), StorageClass::BoxedValue);
        assert_eq!(info.issues.len(), 1);
        assert_eq!(info.issues[0].check_id, "variable.maybeUndefined");
        assert_eq!(info.issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_undefined_read_is_an_error() {
        let mut f = ExprFactory::new();
        let y = f.var("y");
        let info = analyze(vec![], vec![Stmt::Echo(vec![y])]);
        assert_eq!(info.issues.len(), 1);
        assert_eq!(info.issues[0].check_id, "variable.undefined");
    }

    #[test]
    fn test_isset_is_quiet() {
        let mut f = ExprFactory::new();
        let y = f.var("y");
        let isset = f.isset(vec![y]);
        let info = analyze(vec![], vec![Stmt::Expr(isset)]);
        assert!(info.issues.is_empty());
    }

    #[test]
    fn test_append_vivifies_boxed_container() {
        // $arr[] = 5;
        let mut f = ExprFactory::new();
        let arr = f.var("arr");
        let tail = f.array_tail(arr);
        let five = f.long(5);
        let store = f.assign(tail, five);
        let info = analyze(vec![], vec![Stmt::Expr(store)]);
        assert_eq!(storage(&info, "arr"), StorageClass::BoxedValue);
        assert!(info.issues.is_empty());
    }

    #[test]
    fn test_facet_change_after_read_restarts() {
        // $x = 1; $y = $x + 1; $x = 1.5;
        let mut f = ExprFactory::new();
        let one = f.long(1);
        let x = f.var("x");
        let one_more = f.long(1);
        let sum = f.add(x, one_more);
        let sum_id = sum.id;
        let half = f.double(1.5);
        let body = vec![assign(&mut f, "x", one), assign(&mut f, "y", sum), assign(&mut f, "x", half)];
        let info = analyze(vec![], body);

        assert_eq!(info.restarts, 1);
        assert_eq!(storage(&info, "x"), StorageClass::BoxedValue);
        assert_eq!(info.facet(sum_id), Ok(TypeFacet::Value));
        assert_eq!(storage(&info, "y"), StorageClass::BoxedValue);
    }

    #[test]
    fn test_loop_discovery_marks_later_assignment() {
        // $i = 0; while ($i < 3) { if ($i > 0) { echo $last; } $last = $i; $i = $i + 1; }
        let mut f = ExprFactory::new();
        let zero = f.long(0);
        let i = f.var("i");
        let three = f.long(3);
        let test = f.lt(i, three);
        let i = f.var("i");
        let zero2 = f.long(0);
        let positive = f.binary(BinaryOp::Gt, i, zero2);
        let last = f.var("last");
        let last_id = last.id;
        let i = f.var("i");
        let i2 = f.var("i");
        let one = f.long(1);
        let next = f.add(i2, one);
        let body = vec![
            assign(&mut f, "i", zero),
            Stmt::While {
                test,
                body: vec![
                    Stmt::If {
                        test: positive,
                        then: vec![Stmt::Echo(vec![last])],
                        otherwise: vec![],
                    },
                    assign(&mut f, "last", i),
                    assign(&mut f, "i", next),
                ],
            },
        ];
        let info = analyze(vec![], body);
        assert_eq!(info.state(last_id), VarState::Unknown);
        assert_eq!(storage(&info, "i"), StorageClass::BoxedValue);
        assert_eq!(info.issues.len(), 1);
    }

    #[test]
    fn test_break_state_reaches_loop_exit() {
        // while (true) { $x = 1; break; } echo $x;
        let mut f = ExprFactory::new();
        let test = f.bool(true);
        let one = f.long(1);
        let x = f.var("x");
        let x_id = x.id;
        let body = vec![
            Stmt::While {
                test,
                body: vec![assign(&mut f, "x", one), Stmt::Break { depth: 1 }],
            },
            Stmt::Echo(vec![x]),
        ];
        let info = analyze(vec![], body);
        // the condition may fail before the first iteration
        assert_eq!(info.state(x_id), VarState::Unknown);
    }

    #[test]
    fn test_return_makes_rest_unreachable() {
        // if ($c) { $x = 1; } else { return; } echo $x;
        let mut f = ExprFactory::new();
        let c = f.var("c");
        let one = f.long(1);
        let x = f.var("x");
        let x_id = x.id;
        let body = vec![
            Stmt::If {
                test: c,
                then: vec![assign(&mut f, "x", one)],
                otherwise: vec![Stmt::Return(None)],
            },
            Stmt::Echo(vec![x]),
        ];
        let info = analyze(vec![Param::new("c")], body);
        assert_eq!(info.state(x_id), VarState::Valid);
        assert_eq!(storage(&info, "x"), StorageClass::PrimitiveLong);
    }

    #[test]
    fn test_logical_right_operand_merges() {
        // $c && ($x = 1); echo $x;
        let mut f = ExprFactory::new();
        let c = f.var("c");
        let x = f.var("x");
        let one = f.long(1);
        let store = f.assign(x, one);
        let and = f.and(c, store);
        let read = f.var("x");
        let read_id = read.id;
        let body = vec![Stmt::Expr(and), Stmt::Echo(vec![read])];
        let info = analyze(vec![Param::new("c")], body);
        assert_eq!(info.state(read_id), VarState::Unknown);
    }

    #[test]
    fn test_dynamic_scope_call() {
        // $x = 1; extract($arr); echo $x;
        let mut f = ExprFactory::new();
        let one = f.long(1);
        let arr = f.var("arr");
        let call = f.call("extract", vec![arr]);
        let x = f.var("x");
        let body = vec![assign(&mut f, "x", one), Stmt::Expr(call), Stmt::Echo(vec![x])];
        let oracle = SignatureTable::new().with("extract", CalleeSignature::new(vec![false]));
        let info = analyze_with(vec![Param::new("arr")], body, &oracle);

        assert!(info.uses_dynamic_scope());
        assert_eq!(storage(&info, "x"), StorageClass::DynamicLookup);
        assert_eq!(storage(&info, "arr"), StorageClass::DynamicLookup);
        assert!(info.issues.is_empty());
    }

    #[test]
    fn test_by_ref_argument_aliases() {
        let mut f = ExprFactory::new();
        let items = f.var("items");
        let call = f.call("sort", vec![items]);
        let oracle = SignatureTable::new().with("sort", CalleeSignature::new(vec![true]));
        let info = analyze_with(vec![Param::new("items")], vec![Stmt::Expr(call)], &oracle);
        let items = info.bindings.find("items").unwrap();
        assert!(info.binding(items).is_aliased);
        assert_eq!(info.storage(items), StorageClass::AliasCell);
    }

    #[test]
    fn test_main_variables_are_global() {
        let mut f = ExprFactory::new();
        let one = f.long(1);
        let program = Program::new(vec![], vec![assign(&mut f, "g", one)]);
        let info = analyze_function(
            FunctionBody::main(&program),
            &AnalyzeConfig::default(),
            &SignatureTable::new(),
        );
        assert!(info.is_main);
        assert_eq!(storage(&info, "g"), StorageClass::DynamicLookup);
    }

    #[test]
    fn test_every_node_has_facts() {
        let mut f = ExprFactory::new();
        let a = f.var("a");
        let s = f.string("n=");
        let chain = f.concat(s, a);
        let c = f.var("c");
        let k = f.string("k");
        let get = f.array_get(c, k);
        let suppressed = f.suppress(get);
        let body = vec![Stmt::Echo(vec![chain, suppressed])];
        let def = FunctionDef::new("f", vec![Param::new("a"), Param::new("c")], body);
        let info = analyze_function(
            FunctionBody::of(&def),
            &AnalyzeConfig::default(),
            &SignatureTable::new(),
        );
        let mut ids = Vec::new();
        for stmt in &def.body {
            for e in stmt.exprs() {
                collect_ids(e, &mut ids);
            }
        }
        for id in ids {
            assert!(info.facts(id).is_ok(), "node {} has no facts", id);
        }
    }

    fn collect_ids(e: &Expr, ids: &mut Vec<NodeId>) {
        ids.push(e.id);
        for child in e.children() {
            collect_ids(child, ids);
        }
    }
}
