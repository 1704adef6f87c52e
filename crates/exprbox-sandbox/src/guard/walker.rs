//! Scope-aware AST walker that validates an expression and produces the
//! guard edits.
//!
//! The walker keeps a stack of declared names so that only identifiers the
//! expression does not declare itself are routed through the data container.

use std::collections::HashSet;

use oxc_ast::ast::*;
use oxc_span::GetSpan;

use super::{Edit, GuardViolation, DATA_IDENT, FORBIDDEN_PROPERTIES, RESERVED_IDENTIFIERS, SANITIZE_IDENT};
use crate::extend::is_extension_name;

type Walk = Result<(), GuardViolation>;

/// Free identifiers that resolve natively and are never rewritten.
const PASS_THROUGH: &[&str] = &["undefined", "NaN", "Infinity", "arguments"];

pub(super) struct Rewriter {
    scopes: Vec<HashSet<String>>,
    edits: Vec<Edit>,
    /// Non-zero while inside an optional chain. Extension calls are not
    /// rewritten there, because moving the receiver into an argument position
    /// would break short-circuiting.
    chain_depth: usize,
}

impl Rewriter {
    pub(super) fn new() -> Self {
        Self {
            scopes: Vec::new(),
            edits: Vec::new(),
            chain_depth: 0,
        }
    }

    pub(super) fn rewrite_program(mut self, program: &Program<'_>) -> Result<Vec<Edit>, GuardViolation> {
        let mut names = HashSet::new();
        collect_var_names(&program.body, &mut names);
        collect_lexical_names(&program.body, &mut names);
        self.scopes.push(names);
        self.walk_statements(&program.body)?;
        Ok(self.edits)
    }

    // --- Scopes ---

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }

    fn needs_rewrite(&self, name: &str) -> bool {
        !RESERVED_IDENTIFIERS.contains(&name)
            && !PASS_THROUGH.contains(&name)
            && !self.is_declared(name)
    }

    fn scoped(&mut self, names: HashSet<String>, f: impl FnOnce(&mut Self) -> Walk) -> Walk {
        self.scopes.push(names);
        let result = f(self);
        self.scopes.pop();
        result
    }

    // --- Identifiers ---

    fn visit_reference(&mut self, ident: &IdentifierReference<'_>, write: bool) -> Walk {
        let name = ident.name.as_str();
        check_forbidden(name)?;
        check_banned_identifier(name)?;
        if write && RESERVED_IDENTIFIERS.contains(&name) {
            return Err(GuardViolation::ReservedIdentifier {
                name: name.to_string(),
            });
        }
        if self.needs_rewrite(name) {
            self.edits
                .push(Edit::replace(ident.span, format!("{DATA_IDENT}.{name}")));
        }
        Ok(())
    }

    // --- Statements ---

    fn walk_statements(&mut self, stmts: &[Statement<'_>]) -> Walk {
        stmts.iter().try_for_each(|s| self.walk_statement(s))
    }

    fn walk_block(&mut self, stmts: &[Statement<'_>]) -> Walk {
        let mut names = HashSet::new();
        collect_lexical_names(stmts, &mut names);
        self.scoped(names, |this| this.walk_statements(stmts))
    }

    fn walk_statement(&mut self, stmt: &Statement<'_>) -> Walk {
        match stmt {
            Statement::ExpressionStatement(es) => self.walk_expression(&es.expression),
            Statement::BlockStatement(block) => self.walk_block(&block.body),
            Statement::IfStatement(ifs) => {
                self.walk_expression(&ifs.test)?;
                self.walk_statement(&ifs.consequent)?;
                match &ifs.alternate {
                    Some(alt) => self.walk_statement(alt),
                    None => Ok(()),
                }
            }
            Statement::ReturnStatement(ret) => self.walk_opt(ret.argument.as_ref()),
            Statement::ThrowStatement(ts) => self.walk_expression(&ts.argument),
            Statement::VariableDeclaration(decl) => self.walk_declaration(decl),
            Statement::FunctionDeclaration(func) => self.walk_function(func, false),
            Statement::ClassDeclaration(class) => self.walk_class(class, false),
            Statement::ForStatement(fors) => {
                let mut names = HashSet::new();
                if let Some(ForStatementInit::VariableDeclaration(decl)) = &fors.init {
                    if !matches!(decl.kind, VariableDeclarationKind::Var) {
                        for d in &decl.declarations {
                            collect_pattern_names(&d.id, &mut names);
                        }
                    }
                }
                self.scoped(names, |this| {
                    match &fors.init {
                        Some(ForStatementInit::VariableDeclaration(decl)) => {
                            this.walk_declaration(decl)?
                        }
                        Some(init) => this.walk_opt(init.as_expression())?,
                        None => {}
                    }
                    this.walk_opt(fors.test.as_ref())?;
                    this.walk_opt(fors.update.as_ref())?;
                    this.walk_statement(&fors.body)
                })
            }
            Statement::ForInStatement(fis) => self.walk_for_each(&fis.left, &fis.right, &fis.body),
            Statement::ForOfStatement(fos) => self.walk_for_each(&fos.left, &fos.right, &fos.body),
            Statement::WhileStatement(ws) => {
                self.walk_expression(&ws.test)?;
                self.walk_statement(&ws.body)
            }
            Statement::DoWhileStatement(dws) => {
                self.walk_statement(&dws.body)?;
                self.walk_expression(&dws.test)
            }
            Statement::SwitchStatement(ss) => {
                self.walk_expression(&ss.discriminant)?;
                let mut names = HashSet::new();
                for case in &ss.cases {
                    collect_lexical_names(&case.consequent, &mut names);
                }
                self.scoped(names, |this| {
                    for case in &ss.cases {
                        this.walk_opt(case.test.as_ref())?;
                        this.walk_statements(&case.consequent)?;
                    }
                    Ok(())
                })
            }
            Statement::TryStatement(ts) => {
                self.walk_block(&ts.block.body)?;
                if let Some(handler) = &ts.handler {
                    let mut names = HashSet::new();
                    if let Some(param) = &handler.param {
                        collect_pattern_names(&param.pattern, &mut names);
                    }
                    self.scoped(names, |this| {
                        if let Some(param) = &handler.param {
                            this.walk_binding_pattern(&param.pattern)?;
                        }
                        this.walk_block(&handler.body.body)
                    })?;
                }
                match &ts.finalizer {
                    Some(finalizer) => self.walk_block(&finalizer.body),
                    None => Ok(()),
                }
            }
            Statement::LabeledStatement(ls) => self.walk_statement(&ls.body),
            Statement::WithStatement(_) => Err(banned(
                "with-statement",
                "with statement is banned in expressions",
            )),
            Statement::ImportDeclaration(_)
            | Statement::ExportAllDeclaration(_)
            | Statement::ExportDefaultDeclaration(_)
            | Statement::ExportNamedDeclaration(_) => Err(banned(
                "module-syntax",
                "import and export declarations are not allowed in expressions",
            )),
            // Break, Continue, Empty, Debugger and TypeScript-only statements
            _ => Ok(()),
        }
    }

    fn walk_for_each(
        &mut self,
        left: &ForStatementLeft<'_>,
        right: &Expression<'_>,
        body: &Statement<'_>,
    ) -> Walk {
        let mut names = HashSet::new();
        if let ForStatementLeft::VariableDeclaration(decl) = left {
            if !matches!(decl.kind, VariableDeclarationKind::Var) {
                for d in &decl.declarations {
                    collect_pattern_names(&d.id, &mut names);
                }
            }
        }
        self.walk_expression(right)?;
        self.scoped(names, |this| {
            match left {
                ForStatementLeft::VariableDeclaration(decl) => this.walk_declaration(decl)?,
                _ => {
                    if let Some(target) = left.as_assignment_target() {
                        this.walk_assignment_target(target)?;
                    }
                }
            }
            this.walk_statement(body)
        })
    }

    fn walk_declaration(&mut self, decl: &VariableDeclaration<'_>) -> Walk {
        for declarator in &decl.declarations {
            self.walk_binding_pattern(&declarator.id)?;
            self.walk_opt(declarator.init.as_ref())?;
        }
        Ok(())
    }

    // --- Bindings ---

    fn walk_binding_pattern(&mut self, pattern: &BindingPattern<'_>) -> Walk {
        match &pattern.kind {
            BindingPatternKind::BindingIdentifier(id) => check_binding_name(id.name.as_str()),
            BindingPatternKind::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.walk_property_key(&prop.key)?;
                    self.walk_binding_pattern(&prop.value)?;
                }
                match &obj.rest {
                    Some(rest) => self.walk_binding_pattern(&rest.argument),
                    None => Ok(()),
                }
            }
            BindingPatternKind::ArrayPattern(arr) => {
                for element in arr.elements.iter().flatten() {
                    self.walk_binding_pattern(element)?;
                }
                match &arr.rest {
                    Some(rest) => self.walk_binding_pattern(&rest.argument),
                    None => Ok(()),
                }
            }
            BindingPatternKind::AssignmentPattern(assign) => {
                self.walk_binding_pattern(&assign.left)?;
                self.walk_expression(&assign.right)
            }
        }
    }

    fn walk_property_key(&mut self, key: &PropertyKey<'_>) -> Walk {
        if let Some(name) = key.static_name() {
            check_forbidden(&name)?;
        }
        self.walk_opt(key.as_expression())
    }

    // --- Functions and classes ---

    fn walk_function(&mut self, func: &Function<'_>, name_in_own_scope: bool) -> Walk {
        if let Some(id) = &func.id {
            check_binding_name(id.name.as_str())?;
        }
        let own_name = func
            .id
            .as_ref()
            .filter(|_| name_in_own_scope)
            .map(|id| id.name.as_str());
        self.walk_callable(own_name, &func.params, func.body.as_deref())
    }

    fn walk_callable(
        &mut self,
        own_name: Option<&str>,
        params: &FormalParameters<'_>,
        body: Option<&FunctionBody<'_>>,
    ) -> Walk {
        let mut names = HashSet::new();
        if let Some(name) = own_name {
            names.insert(name.to_string());
        }
        for param in &params.items {
            collect_pattern_names(&param.pattern, &mut names);
        }
        if let Some(rest) = &params.rest {
            collect_pattern_names(&rest.argument, &mut names);
        }
        if let Some(body) = body {
            collect_var_names(&body.statements, &mut names);
            collect_lexical_names(&body.statements, &mut names);
        }

        let outer_chain_depth = std::mem::take(&mut self.chain_depth);
        let result = self.scoped(names, |this| {
            for param in &params.items {
                this.walk_binding_pattern(&param.pattern)?;
            }
            if let Some(rest) = &params.rest {
                this.walk_binding_pattern(&rest.argument)?;
            }
            match body {
                Some(body) => this.walk_statements(&body.statements),
                None => Ok(()),
            }
        });
        self.chain_depth = outer_chain_depth;
        result
    }

    fn walk_class(&mut self, class: &Class<'_>, name_in_own_scope: bool) -> Walk {
        if let Some(id) = &class.id {
            check_binding_name(id.name.as_str())?;
        }
        self.walk_opt(class.super_class.as_ref())?;

        let mut names = HashSet::new();
        if name_in_own_scope {
            if let Some(id) = &class.id {
                names.insert(id.name.to_string());
            }
        }
        self.scoped(names, |this| {
            for element in &class.body.body {
                match element {
                    ClassElement::MethodDefinition(md) => {
                        if !matches!(md.kind, MethodDefinitionKind::Constructor) {
                            this.walk_property_key(&md.key)?;
                        }
                        this.walk_callable(None, &md.value.params, md.value.body.as_deref())?;
                    }
                    ClassElement::PropertyDefinition(pd) => {
                        this.walk_property_key(&pd.key)?;
                        this.walk_opt(pd.value.as_ref())?;
                    }
                    ClassElement::AccessorProperty(ap) => {
                        this.walk_property_key(&ap.key)?;
                        this.walk_opt(ap.value.as_ref())?;
                    }
                    ClassElement::StaticBlock(sb) => this.walk_block(&sb.body)?,
                    _ => {}
                }
            }
            Ok(())
        })
    }

    // --- Expressions ---

    fn walk_opt(&mut self, expr: Option<&Expression<'_>>) -> Walk {
        match expr {
            Some(expr) => self.walk_expression(expr),
            None => Ok(()),
        }
    }

    fn walk_all(&mut self, exprs: &[Expression<'_>]) -> Walk {
        exprs.iter().try_for_each(|e| self.walk_expression(e))
    }

    fn walk_expression(&mut self, expr: &Expression<'_>) -> Walk {
        match expr {
            Expression::Identifier(ident) => self.visit_reference(ident, false),
            Expression::CallExpression(call) => self.walk_call(call),
            Expression::NewExpression(new_expr) => {
                check_new_callee(&new_expr.callee)?;
                self.walk_expression(&new_expr.callee)?;
                self.walk_arguments(&new_expr.arguments)
            }
            Expression::StaticMemberExpression(member) => self.walk_static_member(member),
            Expression::ComputedMemberExpression(member) => self.walk_computed_member(member),
            Expression::PrivateFieldExpression(pf) => self.walk_expression(&pf.object),
            Expression::TaggedTemplateExpression(tagged) => {
                self.walk_expression(&tagged.tag)?;
                self.walk_all(&tagged.quasi.expressions)
            }
            Expression::TemplateLiteral(tl) => self.walk_all(&tl.expressions),
            Expression::MetaProperty(meta) => check_meta_property(meta),
            Expression::ImportExpression(_) => Err(banned(
                "dynamic-import",
                "dynamic import() is banned in expressions",
            )),
            Expression::ArrowFunctionExpression(arrow) => {
                self.walk_callable(None, &arrow.params, Some(&*arrow.body))
            }
            Expression::FunctionExpression(func) => self.walk_function(func, true),
            Expression::ClassExpression(class) => self.walk_class(class, true),
            Expression::AssignmentExpression(assign) => {
                self.walk_assignment_target(&assign.left)?;
                self.walk_expression(&assign.right)
            }
            Expression::UpdateExpression(update) => self.walk_simple_target(&update.argument),
            Expression::UnaryExpression(unary) => self.walk_unary(unary),
            Expression::BinaryExpression(bin) => {
                self.walk_expression(&bin.left)?;
                self.walk_expression(&bin.right)
            }
            Expression::PrivateInExpression(pin) => self.walk_expression(&pin.right),
            Expression::LogicalExpression(log) => {
                self.walk_expression(&log.left)?;
                self.walk_expression(&log.right)
            }
            Expression::ConditionalExpression(cond) => {
                self.walk_expression(&cond.test)?;
                self.walk_expression(&cond.consequent)?;
                self.walk_expression(&cond.alternate)
            }
            Expression::SequenceExpression(seq) => self.walk_all(&seq.expressions),
            Expression::ArrayExpression(arr) => {
                for elem in &arr.elements {
                    match elem {
                        ArrayExpressionElement::SpreadElement(spread) => {
                            self.walk_expression(&spread.argument)?
                        }
                        ArrayExpressionElement::Elision(_) => {}
                        _ => self.walk_opt(elem.as_expression())?,
                    }
                }
                Ok(())
            }
            Expression::ObjectExpression(obj) => self.walk_object(obj),
            Expression::AwaitExpression(aw) => self.walk_expression(&aw.argument),
            Expression::YieldExpression(y) => self.walk_opt(y.argument.as_ref()),
            Expression::ParenthesizedExpression(paren) => self.walk_expression(&paren.expression),
            Expression::ChainExpression(chain) => {
                self.chain_depth += 1;
                let result = self.walk_chain(&chain.expression);
                self.chain_depth -= 1;
                result
            }
            // Literals, `this`, `super` and TypeScript-only nodes
            _ => Ok(()),
        }
    }

    fn walk_arguments(&mut self, args: &[Argument<'_>]) -> Walk {
        for arg in args {
            match arg {
                Argument::SpreadElement(spread) => self.walk_expression(&spread.argument)?,
                _ => self.walk_opt(arg.as_expression())?,
            }
        }
        Ok(())
    }

    fn walk_call(&mut self, call: &CallExpression<'_>) -> Walk {
        check_call_callee(&call.callee)?;
        if self.chain_depth == 0 && !call.optional {
            if let Expression::StaticMemberExpression(member) = &call.callee {
                let name = member.property.name.as_str();
                if !member.optional
                    && is_extension_name(name)
                    && !matches!(member.object, Expression::Super(_))
                {
                    return self.walk_extension_call(call, member, name);
                }
            }
        }
        self.walk_expression(&call.callee)?;
        self.walk_arguments(&call.arguments)
    }

    /// `recv.name(a, b)` becomes `__data.extend(recv, "name", [a, b])`.
    fn walk_extension_call(
        &mut self,
        call: &CallExpression<'_>,
        member: &StaticMemberExpression<'_>,
        name: &str,
    ) -> Walk {
        check_static_member(member)?;
        let object_end = member.object.span().end;
        self.edits.push(Edit::insert(
            call.span.start,
            format!("{DATA_IDENT}.extend("),
        ));
        match (call.arguments.first(), call.arguments.last()) {
            (Some(first), Some(last)) => {
                self.edits.push(Edit::replace_range(
                    object_end,
                    first.span().start,
                    format!(", \"{name}\", ["),
                ));
                self.edits
                    .push(Edit::replace_range(last.span().end, call.span.end, "])"));
            }
            _ => self.edits.push(Edit::replace_range(
                object_end,
                call.span.end,
                format!(", \"{name}\", [])"),
            )),
        }
        self.walk_expression(&member.object)?;
        self.walk_arguments(&call.arguments)
    }

    fn walk_static_member(&mut self, member: &StaticMemberExpression<'_>) -> Walk {
        check_static_member(member)?;
        self.walk_expression(&member.object)
    }

    fn walk_computed_member(&mut self, member: &ComputedMemberExpression<'_>) -> Walk {
        check_computed_member(member)?;
        self.walk_expression(&member.object)?;
        if !is_static_key(&member.expression) {
            let span = member.expression.span();
            self.edits
                .push(Edit::insert(span.start, format!("{SANITIZE_IDENT}(")));
            self.walk_expression(&member.expression)?;
            self.edits.push(Edit::insert(span.end, ")"));
            return Ok(());
        }
        self.walk_expression(&member.expression)
    }

    fn walk_member(&mut self, member: &MemberExpression<'_>) -> Walk {
        match member {
            MemberExpression::StaticMemberExpression(m) => self.walk_static_member(m),
            MemberExpression::ComputedMemberExpression(m) => self.walk_computed_member(m),
            MemberExpression::PrivateFieldExpression(pf) => self.walk_expression(&pf.object),
        }
    }

    fn walk_chain(&mut self, element: &ChainElement<'_>) -> Walk {
        match element {
            ChainElement::CallExpression(call) => self.walk_call(call),
            ChainElement::StaticMemberExpression(member) => self.walk_static_member(member),
            ChainElement::ComputedMemberExpression(member) => self.walk_computed_member(member),
            ChainElement::PrivateFieldExpression(pf) => self.walk_expression(&pf.object),
            _ => Ok(()),
        }
    }

    fn walk_unary(&mut self, unary: &UnaryExpression<'_>) -> Walk {
        if matches!(unary.operator, UnaryOperator::Typeof) {
            if let Expression::Identifier(ident) = &unary.argument {
                let name = ident.name.as_str();
                check_forbidden(name)?;
                check_banned_identifier(name)?;
                if self.needs_rewrite(name) {
                    self.edits.push(Edit::replace(
                        unary.span,
                        format!(
                            "(\"{name}\" in {DATA_IDENT} ? typeof {DATA_IDENT}.{name} : \"undefined\")"
                        ),
                    ));
                }
                return Ok(());
            }
        }
        self.walk_expression(&unary.argument)
    }

    fn walk_object(&mut self, obj: &ObjectExpression<'_>) -> Walk {
        for prop in &obj.properties {
            match prop {
                ObjectPropertyKind::ObjectProperty(p) => {
                    self.walk_property_key(&p.key)?;
                    if p.shorthand {
                        if let Expression::Identifier(ident) = &p.value {
                            let name = ident.name.as_str();
                            check_banned_identifier(name)?;
                            if self.needs_rewrite(name) {
                                self.edits.push(Edit::replace(
                                    p.span,
                                    format!("{name}: {DATA_IDENT}.{name}"),
                                ));
                            }
                            continue;
                        }
                    }
                    self.walk_expression(&p.value)?;
                }
                ObjectPropertyKind::SpreadProperty(spread) => {
                    self.walk_expression(&spread.argument)?
                }
            }
        }
        Ok(())
    }

    // --- Assignment targets ---

    fn walk_simple_target(&mut self, target: &SimpleAssignmentTarget<'_>) -> Walk {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) => {
                self.visit_reference(ident, true)
            }
            _ => match target.as_member_expression() {
                Some(member) => self.walk_member(member),
                None => Ok(()),
            },
        }
    }

    fn walk_assignment_target(&mut self, target: &AssignmentTarget<'_>) -> Walk {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(ident) => self.visit_reference(ident, true),
            AssignmentTarget::ArrayAssignmentTarget(arr) => {
                for element in arr.elements.iter().flatten() {
                    self.walk_maybe_default(element)?;
                }
                match &arr.rest {
                    Some(rest) => self.walk_assignment_target(&rest.target),
                    None => Ok(()),
                }
            }
            AssignmentTarget::ObjectAssignmentTarget(obj) => {
                for prop in &obj.properties {
                    match prop {
                        AssignmentTargetProperty::AssignmentTargetPropertyIdentifier(p) => {
                            let name = p.binding.name.as_str();
                            check_forbidden(name)?;
                            if RESERVED_IDENTIFIERS.contains(&name) {
                                return Err(GuardViolation::ReservedIdentifier {
                                    name: name.to_string(),
                                });
                            }
                            if self.needs_rewrite(name) {
                                self.edits.push(Edit::replace(
                                    p.binding.span,
                                    format!("{name}: {DATA_IDENT}.{name}"),
                                ));
                            }
                            self.walk_opt(p.init.as_ref())?;
                        }
                        AssignmentTargetProperty::AssignmentTargetPropertyProperty(p) => {
                            self.walk_property_key(&p.name)?;
                            self.walk_maybe_default(&p.binding)?;
                        }
                    }
                }
                match &obj.rest {
                    Some(rest) => self.walk_assignment_target(&rest.target),
                    None => Ok(()),
                }
            }
            _ => match target.as_member_expression() {
                Some(member) => self.walk_member(member),
                None => Ok(()),
            },
        }
    }

    fn walk_maybe_default(&mut self, target: &AssignmentTargetMaybeDefault<'_>) -> Walk {
        match target {
            AssignmentTargetMaybeDefault::AssignmentTargetWithDefault(with_default) => {
                self.walk_assignment_target(&with_default.binding)?;
                self.walk_expression(&with_default.init)
            }
            _ => match target.as_assignment_target() {
                Some(inner) => self.walk_assignment_target(inner),
                None => Ok(()),
            },
        }
    }
}

// --- Declared-name collection ---

fn collect_pattern_names(pattern: &BindingPattern<'_>, out: &mut HashSet<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(id) => {
            out.insert(id.name.to_string());
        }
        BindingPatternKind::ObjectPattern(obj) => {
            for prop in &obj.properties {
                collect_pattern_names(&prop.value, out);
            }
            if let Some(rest) = &obj.rest {
                collect_pattern_names(&rest.argument, out);
            }
        }
        BindingPatternKind::ArrayPattern(arr) => {
            for element in arr.elements.iter().flatten() {
                collect_pattern_names(element, out);
            }
            if let Some(rest) = &arr.rest {
                collect_pattern_names(&rest.argument, out);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => collect_pattern_names(&assign.left, out),
    }
}

/// `let`/`const`/class/function names declared directly in `stmts`.
fn collect_lexical_names(stmts: &[Statement<'_>], out: &mut HashSet<String>) {
    for stmt in stmts {
        match stmt {
            Statement::VariableDeclaration(decl)
                if !matches!(decl.kind, VariableDeclarationKind::Var) =>
            {
                for d in &decl.declarations {
                    collect_pattern_names(&d.id, out);
                }
            }
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    out.insert(id.name.to_string());
                }
            }
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    out.insert(id.name.to_string());
                }
            }
            _ => {}
        }
    }
}

/// `var` names anywhere in `stmts`, not descending into nested functions.
fn collect_var_names(stmts: &[Statement<'_>], out: &mut HashSet<String>) {
    for stmt in stmts {
        collect_var_names_in(stmt, out);
    }
}

fn collect_var_declaration(decl: &VariableDeclaration<'_>, out: &mut HashSet<String>) {
    if matches!(decl.kind, VariableDeclarationKind::Var) {
        for d in &decl.declarations {
            collect_pattern_names(&d.id, out);
        }
    }
}

fn collect_var_names_in(stmt: &Statement<'_>, out: &mut HashSet<String>) {
    match stmt {
        Statement::VariableDeclaration(decl) => collect_var_declaration(decl, out),
        Statement::BlockStatement(block) => collect_var_names(&block.body, out),
        Statement::IfStatement(ifs) => {
            collect_var_names_in(&ifs.consequent, out);
            if let Some(alt) = &ifs.alternate {
                collect_var_names_in(alt, out);
            }
        }
        Statement::ForStatement(fors) => {
            if let Some(ForStatementInit::VariableDeclaration(decl)) = &fors.init {
                collect_var_declaration(decl, out);
            }
            collect_var_names_in(&fors.body, out);
        }
        Statement::ForInStatement(fis) => {
            if let ForStatementLeft::VariableDeclaration(decl) = &fis.left {
                collect_var_declaration(decl, out);
            }
            collect_var_names_in(&fis.body, out);
        }
        Statement::ForOfStatement(fos) => {
            if let ForStatementLeft::VariableDeclaration(decl) = &fos.left {
                collect_var_declaration(decl, out);
            }
            collect_var_names_in(&fos.body, out);
        }
        Statement::WhileStatement(ws) => collect_var_names_in(&ws.body, out),
        Statement::DoWhileStatement(dws) => collect_var_names_in(&dws.body, out),
        Statement::LabeledStatement(ls) => collect_var_names_in(&ls.body, out),
        Statement::SwitchStatement(ss) => {
            for case in &ss.cases {
                collect_var_names(&case.consequent, out);
            }
        }
        Statement::TryStatement(ts) => {
            collect_var_names(&ts.block.body, out);
            if let Some(handler) = &ts.handler {
                collect_var_names(&handler.body.body, out);
            }
            if let Some(finalizer) = &ts.finalizer {
                collect_var_names(&finalizer.body, out);
            }
        }
        _ => {}
    }
}

// --- Checks ---

fn banned(rule: &'static str, description: impl Into<String>) -> GuardViolation {
    GuardViolation::BannedPattern {
        rule,
        description: description.into(),
    }
}

fn check_forbidden(name: &str) -> Walk {
    if FORBIDDEN_PROPERTIES.contains(&name) {
        return Err(GuardViolation::ForbiddenProperty {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn check_binding_name(name: &str) -> Walk {
    if RESERVED_IDENTIFIERS.contains(&name) {
        return Err(GuardViolation::ReservedIdentifier {
            name: name.to_string(),
        });
    }
    check_forbidden(name)
}

fn check_banned_identifier(name: &str) -> Walk {
    match name {
        "Proxy" => Err(banned("banned-global", "Proxy is banned in expressions")),
        "Reflect" => Err(banned("banned-global", "Reflect API is banned in expressions")),
        "WebAssembly" => Err(banned("banned-global", "WebAssembly is banned in expressions")),
        _ => Ok(()),
    }
}

fn check_call_callee(callee: &Expression<'_>) -> Walk {
    if let Expression::Identifier(ident) = callee {
        match ident.name.as_str() {
            "eval" => {
                return Err(banned(
                    "code-generation",
                    "eval() call: expressions cannot generate code",
                ))
            }
            name @ ("Function" | "AsyncFunction" | "GeneratorFunction") => {
                return Err(banned(
                    "code-generation",
                    format!("{name}() constructor: dynamic code generation is banned in expressions"),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_new_callee(callee: &Expression<'_>) -> Walk {
    if let Expression::Identifier(ident) = callee {
        if let name @ ("Function" | "AsyncFunction" | "GeneratorFunction") = ident.name.as_str() {
            return Err(banned(
                "code-generation",
                format!("new {name}() constructor: dynamic code generation is banned in expressions"),
            ));
        }
    }
    Ok(())
}

fn check_symbol_member(member: &StaticMemberExpression<'_>) -> Walk {
    if let Expression::Identifier(obj) = &member.object {
        if obj.name.as_str() == "Symbol" {
            let prop = member.property.name.as_str();
            if matches!(prop, "toPrimitive" | "hasInstance") {
                return Err(banned(
                    "symbol-coercion",
                    format!("Symbol.{prop} is banned: type confusion vector"),
                ));
            }
        }
    }
    Ok(())
}

fn check_static_member(member: &StaticMemberExpression<'_>) -> Walk {
    check_forbidden(member.property.name.as_str())?;
    if let Expression::Identifier(obj) = &member.object {
        match obj.name.as_str() {
            "Deno" => return Err(banned("banned-global", "Deno.* access is banned in expressions")),
            "globalThis" | "global" => check_global_member(member.property.name.as_str())?,
            _ => {}
        }
    }
    check_symbol_member(member)
}

/// `globalThis.X` reaches the same globals as a bare `X`.
fn check_global_member(name: &str) -> Walk {
    match name {
        "eval" | "Function" | "AsyncFunction" | "GeneratorFunction" => Err(banned(
            "code-generation",
            format!("globalThis.{name}: dynamic code generation is banned in expressions"),
        )),
        "Deno" => Err(banned("banned-global", "Deno.* access is banned in expressions")),
        _ => check_banned_identifier(name),
    }
}

fn check_computed_member(member: &ComputedMemberExpression<'_>) -> Walk {
    if let Some(key) = static_key_text(&member.expression) {
        check_forbidden(key)?;
    }
    if let Expression::StaticMemberExpression(key) = &member.expression {
        check_symbol_member(key)?;
    }
    if let Expression::Identifier(obj) = &member.object {
        if obj.name.as_str() == "globalThis" {
            return Err(banned(
                "global-computed-access",
                "globalThis[...] computed access is banned in expressions",
            ));
        }
    }
    Ok(())
}

fn check_meta_property(meta: &MetaProperty<'_>) -> Walk {
    if meta.meta.name.as_str() == "import" && meta.property.name.as_str() == "meta" {
        return Err(banned("import-meta", "import.meta is banned in expressions"));
    }
    Ok(())
}

/// Literal text of a bracket key, for string literals and templates without
/// substitutions.
fn static_key_text<'a>(expr: &'a Expression<'_>) -> Option<&'a str> {
    match expr {
        Expression::StringLiteral(lit) => Some(lit.value.as_str()),
        Expression::TemplateLiteral(tl) if tl.expressions.is_empty() => tl
            .quasis
            .first()
            .and_then(|q| q.value.cooked.as_ref())
            .map(|cooked| cooked.as_str()),
        _ => None,
    }
}

fn is_static_key(expr: &Expression<'_>) -> bool {
    static_key_text(expr).is_some()
        || matches!(
            expr,
            Expression::NumericLiteral(_) | Expression::BooleanLiteral(_) | Expression::NullLiteral(_)
        )
}
