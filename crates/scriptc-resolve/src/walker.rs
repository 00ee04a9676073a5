//! The AST-walking capability the resolver depends on

use scriptc_lexer::Span;

use crate::error::Result;
use crate::scope::ScopeKind;
use crate::unit::DefinitionHandle;

/// How a name was introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Declaration {
    /// Assignment target, parameter, output or loop variable
    Local,
    /// A function definition; top-level ones become unit slots
    Function,
    Persistent,
    Global,
}

/// Receiver of the callbacks a walk produces, in source order.
///
/// Every `exit_scope` pairs with an earlier `enter_scope`.
pub trait Visitor {
    fn enter_scope(&mut self, kind: ScopeKind, name: Option<&str>, span: Span);
    fn exit_scope(&mut self);
    fn declare(&mut self, name: &str, declaration: Declaration, span: Span);
    fn reference(&mut self, name: &str, span: Span);
}

/// Walks a unit body and reports every identifier access to a [`Visitor`]
pub trait AstWalker {
    fn walk(&self, handle: &DefinitionHandle, visitor: &mut dyn Visitor) -> Result<()>;
}
