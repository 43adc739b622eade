//! Call-graph construction over the loaded packages.
//!
//! Nodes are the functions, methods and closures declared in module
//! packages; edges are "may call" under the configured algorithm. Node
//! identity is the petgraph index, never a name: ambiguous overloads stay
//! distinct.

use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use tree_sitter::Node;

use super::packages::{GoFile, GoPackage};

/// Algorithm used to resolve dynamic calls.
///
/// Precision ordering is `pointer ⊆ rta ⊆ cha`; `static` resolves direct
/// calls only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphAlgo {
    Pointer,
    Static,
    Cha,
    Rta,
}

impl GraphAlgo {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pointer" => Some(Self::Pointer),
            "static" => Some(Self::Static),
            "cha" => Some(Self::Cha),
            "rta" => Some(Self::Rta),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Static => "static",
            Self::Cha => "cha",
            Self::Rta => "rta",
        }
    }
}

/// One function-like declaration in the graph.
///
/// Methods carry the receiver type as their first parameter; closures are
/// named `Outer$1`, `Outer$2`, … in source order.
#[derive(Debug, Clone)]
pub struct CallNode {
    pub name: String,
    pub pkg_path: String,
    pub params: Vec<String>,
}

impl CallNode {
    /// A node is a test candidate iff its first parameter is the testing
    /// handle.
    pub fn is_test_shaped(&self) -> bool {
        self.params
            .first()
            .is_some_and(|p| p.contains("*testing.T") || p.contains("*testing.M"))
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.pkg_path, self.name)
    }
}

pub struct CallGraph {
    graph: StableDiGraph<CallNode, ()>,
}

impl CallGraph {
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &CallNode)> {
        self.graph
            .node_indices()
            .filter_map(|i| self.graph.node_weight(i).map(|w| (i, w)))
    }

    pub fn node(&self, idx: NodeIndex) -> &CallNode {
        &self.graph[idx]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Depth-first search from `from`; true when any target is reachable
    /// (the start node itself included).
    pub fn reaches_any(&self, from: NodeIndex, targets: &HashSet<NodeIndex>) -> bool {
        if targets.contains(&from) {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            for next in self.graph.neighbors(n) {
                if targets.contains(&next) {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }

    /// Builds the graph for all `packages` with the chosen algorithm.
    ///
    /// Callees without a declaration in the loaded packages (stdlib,
    /// external modules) are never materialized, so no synthetic nodes
    /// survive into the returned graph.
    pub fn build(packages: &[GoPackage], algo: GraphAlgo) -> CallGraph {
        Builder::new(packages, algo).build()
    }
}

struct Decl<'t> {
    idx: NodeIndex,
    body: Node<'t>,
    file: &'t GoFile,
    pkg_path: &'t str,
    /// Receiver variable -> bare receiver type, for pointer resolution.
    recv_binding: Option<(String, String)>,
}

struct Builder<'t> {
    packages: &'t [GoPackage],
    algo: GraphAlgo,
    graph: StableDiGraph<CallNode, ()>,
    decls: Vec<Decl<'t>>,
    /// (pkg_path, func name) -> node.
    funcs: HashMap<(String, String), Vec<NodeIndex>>,
    /// method name -> (bare receiver type, node).
    methods: HashMap<String, Vec<(String, NodeIndex)>>,
    /// func_literal tree-node id -> closure node.
    closures: HashMap<usize, NodeIndex>,
    /// Bare type names instantiated anywhere in the program.
    instantiated: HashSet<String>,
}

impl<'t> Builder<'t> {
    fn new(packages: &'t [GoPackage], algo: GraphAlgo) -> Self {
        Self {
            packages,
            algo,
            graph: StableDiGraph::new(),
            decls: Vec::new(),
            funcs: HashMap::new(),
            methods: HashMap::new(),
            closures: HashMap::new(),
            instantiated: HashSet::new(),
        }
    }

    fn build(mut self) -> CallGraph {
        for pkg in self.packages {
            for file in pkg.all_files() {
                self.declare_file(pkg, file);
                self.collect_instantiated(file);
            }
        }
        for i in 0..self.decls.len() {
            self.connect(i);
        }
        CallGraph { graph: self.graph }
    }

    fn declare_file(&mut self, pkg: &'t GoPackage, file: &'t GoFile) {
        let root = file.tree.root_node();
        let mut cursor = root.walk();
        for decl in root.named_children(&mut cursor) {
            match decl.kind() {
                "function_declaration" => {
                    let Some(name) = field_text(decl, "name", file) else {
                        continue;
                    };
                    let params = param_types(decl, file);
                    self.declare(pkg, file, decl, name, params, None);
                }
                "method_declaration" => {
                    let Some(name) = field_text(decl, "name", file) else {
                        continue;
                    };
                    let Some((recv_var, recv_ty)) = receiver_of(decl, file) else {
                        continue;
                    };
                    let mut params = vec![recv_ty.clone()];
                    params.extend(param_types(decl, file));
                    self.declare(
                        pkg,
                        file,
                        decl,
                        name,
                        params,
                        Some((recv_var, bare_type(&recv_ty))),
                    );
                }
                _ => {}
            }
        }
    }

    fn declare(
        &mut self,
        pkg: &'t GoPackage,
        file: &'t GoFile,
        decl: Node<'t>,
        name: String,
        params: Vec<String>,
        recv: Option<(String, String)>,
    ) {
        let Some(body) = decl.child_by_field_name("body") else {
            return;
        };
        let idx = self.graph.add_node(CallNode {
            name: name.clone(),
            pkg_path: pkg.path.clone(),
            params: params.clone(),
        });
        if let Some((_, recv_bare)) = &recv {
            self.methods
                .entry(name.clone())
                .or_default()
                .push((recv_bare.clone(), idx));
        } else {
            self.funcs
                .entry((pkg.path.clone(), name.clone()))
                .or_default()
                .push(idx);
        }
        self.decls.push(Decl {
            idx,
            body,
            file,
            pkg_path: pkg.path.as_str(),
            recv_binding: recv,
        });
        self.declare_closures(pkg, file, body, &name);
    }

    /// Numbers every closure inside `body` in pre-order: `parent$1`, ….
    fn declare_closures(&mut self, pkg: &'t GoPackage, file: &'t GoFile, body: Node<'t>, parent: &str) {
        let mut counter = 0u32;
        let mut ordered = Vec::new();
        collect_preorder(body, &mut ordered);
        for node in ordered {
            if node.kind() != "func_literal" {
                continue;
            }
            counter += 1;
            let name = format!("{parent}${counter}");
            let Some(lit_body) = node.child_by_field_name("body") else {
                continue;
            };
            let idx = self.graph.add_node(CallNode {
                name: name.clone(),
                pkg_path: pkg.path.clone(),
                params: literal_param_types(node, file),
            });
            self.closures.insert(node.id(), idx);
            self.decls.push(Decl {
                idx,
                body: lit_body,
                file,
                pkg_path: pkg.path.as_str(),
                recv_binding: None,
            });
        }
    }

    fn collect_instantiated(&mut self, file: &GoFile) {
        let mut ordered = Vec::new();
        collect_preorder(file.tree.root_node(), &mut ordered);
        for node in ordered {
            match node.kind() {
                "composite_literal" => {
                    if let Some(ty) = node.child_by_field_name("type") {
                        if let Some(name) = type_name_of(ty, file) {
                            self.instantiated.insert(name);
                        }
                    }
                }
                "call_expression" => {
                    let callee = node.child_by_field_name("function");
                    if callee.is_some_and(|c| text(c, file) == "new") {
                        if let Some(args) = node.child_by_field_name("arguments") {
                            if let Some(arg) = args.named_child(0) {
                                self.instantiated.insert(bare_type(text(arg, file)));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Adds the outgoing edges of one declaration.
    fn connect(&mut self, decl_i: usize) {
        let decl = &self.decls[decl_i];
        let from = decl.idx;
        let file = decl.file;
        let pkg_path = decl.pkg_path.to_string();
        let body = decl.body;

        let imports = imports_of(file);
        let mut var_types: HashMap<String, String> = HashMap::new();
        if let Some((var, ty)) = &decl.recv_binding {
            var_types.insert(var.clone(), ty.clone());
        }
        if self.algo == GraphAlgo::Pointer {
            collect_var_types(body, file, &mut var_types);
        }

        let mut targets: Vec<NodeIndex> = Vec::new();
        let mut nodes = Vec::new();
        collect_body(body, &mut nodes);
        for node in nodes {
            match node.kind() {
                "func_literal" => {
                    // closure creation counts as may-call of the closure
                    if let Some(&closure) = self.closures.get(&node.id()) {
                        targets.push(closure);
                    }
                }
                "call_expression" => {
                    self.resolve_call(node, file, &pkg_path, &imports, &var_types, &mut targets);
                }
                _ => {}
            }
        }

        let mut seen = HashSet::new();
        for to in targets {
            if to != from && seen.insert(to) {
                self.graph.add_edge(from, to, ());
            }
        }
    }

    fn resolve_call(
        &self,
        call: Node<'_>,
        file: &GoFile,
        pkg_path: &str,
        imports: &HashMap<String, String>,
        var_types: &HashMap<String, String>,
        targets: &mut Vec<NodeIndex>,
    ) {
        let Some(callee) = call.child_by_field_name("function") else {
            return;
        };
        match callee.kind() {
            "identifier" => {
                let name = text(callee, file);
                if let Some(idxs) = self.funcs.get(&(pkg_path.to_string(), name.to_string())) {
                    targets.extend(idxs.iter().copied());
                }
            }
            "selector_expression" => {
                let field = callee
                    .child_by_field_name("field")
                    .map(|f| text(f, file).to_string())
                    .unwrap_or_default();
                let operand = callee.child_by_field_name("operand");
                let operand_name = operand
                    .filter(|o| o.kind() == "identifier")
                    .map(|o| text(o, file).to_string());
                if let Some(alias) = &operand_name {
                    if let Some(target_pkg) = imports.get(alias) {
                        if let Some(idxs) =
                            self.funcs.get(&(target_pkg.clone(), field.clone()))
                        {
                            targets.extend(idxs.iter().copied());
                        }
                        // an import-qualified call never dispatches as a method
                        self.function_value_args(call, file, pkg_path, imports, targets);
                        return;
                    }
                }
                let recv_ty = operand_name.as_deref().and_then(|v| var_types.get(v));
                self.method_edges(&field, recv_ty.map(String::as_str), targets);
            }
            _ => {}
        }
        self.function_value_args(call, file, pkg_path, imports, targets);
    }

    /// A named function passed as an argument may be invoked by the callee
    /// (`t.Run("label", helper)`); treat the reference as may-call.
    fn function_value_args(
        &self,
        call: Node<'_>,
        file: &GoFile,
        pkg_path: &str,
        imports: &HashMap<String, String>,
        targets: &mut Vec<NodeIndex>,
    ) {
        let Some(args) = call.child_by_field_name("arguments") else {
            return;
        };
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            match arg.kind() {
                "identifier" => {
                    let name = text(arg, file);
                    if let Some(idxs) =
                        self.funcs.get(&(pkg_path.to_string(), name.to_string()))
                    {
                        targets.extend(idxs.iter().copied());
                    }
                }
                "selector_expression" => {
                    let operand = arg.child_by_field_name("operand");
                    let field = arg.child_by_field_name("field");
                    if let (Some(op), Some(f)) = (operand, field) {
                        if op.kind() == "identifier" {
                            if let Some(target_pkg) = imports.get(text(op, file)) {
                                if let Some(idxs) = self
                                    .funcs
                                    .get(&(target_pkg.clone(), text(f, file).to_string()))
                                {
                                    targets.extend(idxs.iter().copied());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn method_edges(&self, method: &str, recv_ty: Option<&str>, targets: &mut Vec<NodeIndex>) {
        let Some(candidates) = self.methods.get(method) else {
            return;
        };
        match self.algo {
            GraphAlgo::Static => {}
            GraphAlgo::Cha => targets.extend(candidates.iter().map(|(_, i)| *i)),
            GraphAlgo::Rta => targets.extend(
                candidates
                    .iter()
                    .filter(|(ty, _)| self.instantiated.contains(ty))
                    .map(|(_, i)| *i),
            ),
            GraphAlgo::Pointer => match recv_ty {
                Some(known) => targets.extend(
                    candidates
                        .iter()
                        .filter(|(ty, _)| ty == known)
                        .map(|(_, i)| *i),
                ),
                None => targets.extend(
                    candidates
                        .iter()
                        .filter(|(ty, _)| self.instantiated.contains(ty))
                        .map(|(_, i)| *i),
                ),
            },
        }
    }
}

fn text<'a>(node: Node<'_>, file: &'a GoFile) -> &'a str {
    node.utf8_text(file.source.as_bytes()).unwrap_or_default()
}

fn field_text(node: Node<'_>, field: &str, file: &GoFile) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, file).to_string())
}

/// Pre-order traversal of every named descendant, `node` excluded.
///
/// Closure numbering everywhere in the crate relies on this exact order.
pub(crate) fn collect_preorder<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        out.push(child);
        collect_preorder(child, out);
    }
}

/// Like [`collect_preorder`] but does not descend into nested closures:
/// their bodies belong to the closure's own node.
fn collect_body<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        out.push(child);
        if child.kind() != "func_literal" {
            collect_body(child, out);
        }
    }
}

/// Parameter type text, one entry per declared name.
fn param_types(decl: Node<'_>, file: &GoFile) -> Vec<String> {
    decl.child_by_field_name("parameters")
        .map(|params| parameter_list_types(params, file))
        .unwrap_or_default()
}

fn literal_param_types(lit: Node<'_>, file: &GoFile) -> Vec<String> {
    lit.child_by_field_name("parameters")
        .map(|params| parameter_list_types(params, file))
        .unwrap_or_default()
}

fn parameter_list_types(params: Node<'_>, file: &GoFile) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        if param.kind() != "parameter_declaration"
            && param.kind() != "variadic_parameter_declaration"
        {
            continue;
        }
        let ty = param
            .child_by_field_name("type")
            .map(|t| text(t, file).to_string())
            .unwrap_or_default();
        let names = {
            let mut n = 0;
            let mut c = param.walk();
            for child in param.named_children(&mut c) {
                if child.kind() == "identifier" {
                    n += 1;
                }
            }
            n.max(1)
        };
        for _ in 0..names {
            out.push(ty.clone());
        }
    }
    out
}

/// Receiver variable name and type text (`*Rect` or `Rect`).
fn receiver_of(decl: Node<'_>, file: &GoFile) -> Option<(String, String)> {
    let receiver = decl.child_by_field_name("receiver")?;
    let mut cursor = receiver.walk();
    let param = receiver
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")?;
    let ty = param.child_by_field_name("type")?;
    let var = param
        .child_by_field_name("name")
        .map(|n| text(n, file).to_string())
        .unwrap_or_default();
    Some((var, text(ty, file).to_string()))
}

/// Last identifier segment of a type, `*`/`&` stripped.
fn bare_type(ty: &str) -> String {
    let trimmed = ty.trim_start_matches(['*', '&']);
    trimmed
        .rsplit('.')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

fn type_name_of(ty: Node<'_>, file: &GoFile) -> Option<String> {
    match ty.kind() {
        "type_identifier" => Some(text(ty, file).to_string()),
        "qualified_type" => ty
            .child_by_field_name("name")
            .map(|n| text(n, file).to_string()),
        _ => None,
    }
}

/// `alias -> import path` for one file; unaliased imports use the last
/// path segment.
fn imports_of(file: &GoFile) -> HashMap<String, String> {
    let mut imports = HashMap::new();
    let mut ordered = Vec::new();
    collect_preorder(file.tree.root_node(), &mut ordered);
    for node in ordered {
        if node.kind() != "import_spec" {
            continue;
        }
        let Some(path_node) = node.child_by_field_name("path") else {
            continue;
        };
        let path = text(path_node, file).trim_matches('"').to_string();
        let alias = node
            .child_by_field_name("name")
            .map(|n| text(n, file).to_string())
            .unwrap_or_else(|| {
                path.rsplit('/').next().unwrap_or(&path).to_string()
            });
        if alias != "_" {
            imports.insert(alias, path);
        }
    }
    imports
}

/// Flow-insensitive local variable types from declarations and
/// composite-literal assignments.
fn collect_var_types(body: Node<'_>, file: &GoFile, out: &mut HashMap<String, String>) {
    let mut ordered = Vec::new();
    collect_body(body, &mut ordered);
    for node in ordered {
        match node.kind() {
            "short_var_declaration" | "assignment_statement" => {
                let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) else {
                    continue;
                };
                let (Some(var), Some(value)) = (left.named_child(0), right.named_child(0))
                else {
                    continue;
                };
                if var.kind() != "identifier" {
                    continue;
                }
                if let Some(ty) = literal_type(value, file) {
                    out.insert(text(var, file).to_string(), ty);
                }
            }
            "var_spec" => {
                let Some(var) = node.child_by_field_name("name") else {
                    continue;
                };
                if let Some(ty) = node.child_by_field_name("type") {
                    out.insert(text(var, file).to_string(), bare_type(text(ty, file)));
                } else if let Some(value) = node
                    .child_by_field_name("value")
                    .and_then(|v| v.named_child(0))
                {
                    if let Some(ty) = literal_type(value, file) {
                        out.insert(text(var, file).to_string(), ty);
                    }
                }
            }
            _ => {}
        }
    }
}

fn literal_type(value: Node<'_>, file: &GoFile) -> Option<String> {
    match value.kind() {
        "composite_literal" => value
            .child_by_field_name("type")
            .and_then(|t| type_name_of(t, file)),
        "unary_expression" => value
            .child_by_field_name("operand")
            .and_then(|o| literal_type(o, file)),
        _ => None,
    }
}
