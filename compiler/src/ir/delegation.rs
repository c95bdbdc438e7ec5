//! Delegation lowering
//!
//! `class C(...) : I by expr` is made explicit. The delegate is stored in a
//! synthesized field, evaluated in the primary constructor where the
//! delegation was declared, unless the expression already is a final
//! property with a backing field; then that field is used directly. Each
//! member of `I` the class does not implement itself gets a forwarding
//! function calling the same member on the delegate.

use super::arena::{ClassId, FunctionId};
use super::decls::{Container, IrDecl, IrDelegation, IrFunction, IrModule};
use super::expr::{IrExpr, IrField};
use super::stmt::{IrStmt, StmtKind};
use super::validation::{LoweringError, LoweringErrorKind};
use crate::tast::{DeclId, DeclTable, FunctionKind, TypeRef};

/// Lower the delegations of every class in the module
pub fn lower_delegations(module: &mut IrModule, decls: &DeclTable) -> Result<usize, LoweringError> {
    let classes: Vec<ClassId> = module
        .classes
        .iter()
        .filter(|(_, class)| !class.delegations.is_empty())
        .map(|(id, _)| id)
        .collect();
    let mut forwarded = 0;
    for class in classes {
        forwarded += lower_class(module, decls, class)?;
    }
    if forwarded > 0 {
        tracing::debug!("synthesized {} forwarding members", forwarded);
    }
    Ok(forwarded)
}

fn lower_class(module: &mut IrModule, decls: &DeclTable, class: ClassId) -> Result<usize, LoweringError> {
    let delegations = std::mem::take(&mut module.classes[class].delegations);
    let class_decl = module.classes[class].decl;
    let Some(primary) = module.primary_constructor(class) else {
        return Err(LoweringError {
            kind: LoweringErrorKind::OwnershipViolation {
                decl: class_decl,
                reason: "delegating class has no primary constructor".to_string(),
            },
            function: None,
            location: module.classes[class].location,
        });
    };

    // Later insertions must not shift the positions of earlier ones
    let mut shift = 0;
    let mut forwarded = 0;
    for delegation in delegations {
        let IrDelegation {
            interface,
            initializer,
            prelude,
            insert_at,
            location,
        } = delegation;
        let target = match direct_backing_field(module, decls, primary, &initializer) {
            Some(field) if prelude.is_empty() => field,
            _ => {
                let name = format!("{}$delegate", decls.get(interface).map_or("", |d| d.name.as_str()));
                let field = module.add_delegate_field(class, interface, name);
                let slot = IrExpr::field(Some(IrExpr::This), IrField::Delegate(field));
                let mut inserted = prelude;
                inserted.push(IrStmt::assign(slot.clone(), initializer, location));
                let count = inserted.len();
                if let Some(body) = module.functions[primary].body.as_mut() {
                    let at = (insert_at + shift).min(body.len());
                    body.splice(at..at, inserted);
                }
                shift += count;
                slot
            }
        };

        let members = decls
            .class(class_decl)
            .map(|info| info.delegated_members.clone())
            .unwrap_or_default();
        for member in members.iter().filter(|m| m.interface == interface) {
            if module.function_by_decl(member.member).is_some() {
                continue;
            }
            add_forwarder(module, decls, class, member.member, member.target, &target, location)?;
            forwarded += 1;
        }
    }
    Ok(forwarded)
}

/// `this.p` for a final property `p` with default accessors, given either
/// as the field itself or as the constructor parameter stored into it
fn direct_backing_field(module: &IrModule, decls: &DeclTable, primary: FunctionId, initializer: &IrExpr) -> Option<IrExpr> {
    let property = match initializer {
        IrExpr::Field {
            receiver: Some(receiver),
            field: IrField::Backing(property),
        } if matches!(**receiver, IrExpr::This) => *property,
        IrExpr::Var(v) if !v.free => module.functions[primary]
            .property_params
            .iter()
            .find(|(param, _)| *param == v.var)
            .map(|(_, property)| *property)?,
        _ => return None,
    };
    let info = decls.property(property)?;
    if !info.is_field_like() {
        return None;
    }
    Some(IrExpr::field(Some(IrExpr::This), IrField::Backing(property)))
}

#[allow(clippy::too_many_arguments)]
fn add_forwarder(
    module: &mut IrModule,
    decls: &DeclTable,
    class: ClassId,
    member: DeclId,
    target: DeclId,
    delegate: &IrExpr,
    location: crate::tast::SourceLocation,
) -> Result<(), LoweringError> {
    let missing = |decl: DeclId| LoweringError {
        kind: LoweringErrorKind::OwnershipViolation {
            decl,
            reason: "delegated member is not a function".to_string(),
        },
        function: None,
        location,
    };
    let info = decls.function(member).ok_or_else(|| missing(member))?;
    decls.function(target).ok_or_else(|| missing(target))?;
    let name = decls.get(member).map_or_else(String::new, |d| d.name.clone());

    let container = Container::Class(class);
    let kind = match info.kind {
        FunctionKind::Getter | FunctionKind::Setter => info.kind,
        _ => FunctionKind::Member,
    };
    let id = module
        .functions
        .alloc(IrFunction::new(member, name, kind, container, location));

    let extension = info
        .has_extension_receiver
        .then(|| module.new_parameter("receiver", id));
    let params: Vec<_> = info
        .params
        .iter()
        .map(|p| module.new_parameter(p.name.clone(), id))
        .collect();

    let args = extension
        .iter()
        .chain(params.iter())
        .map(|var| IrExpr::var(*var))
        .collect();
    let call = IrExpr::invoke(Some(delegate.clone()), target, args, true);
    let stmt = if matches!(info.return_type, TypeRef::Unit) {
        IrStmt::eval(call, location)
    } else {
        IrStmt::new(
            StmtKind::Return {
                value: Some(call),
                target: member,
            },
            location,
        )
    };

    let function = &mut module.functions[id];
    function.extension_receiver = extension;
    function.params = params;
    function.body = Some(vec![stmt]);
    module.register(container, member, IrDecl::Function(id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dump::SexpDumper;
    use crate::tast::{
        ClassInfo, ClassKind, DeclInfo, DeclKind, DelegatedMember, FunctionInfo, Modality, ParamInfo,
        PrimitiveKind, PropertyInfo, SourceLocation,
    };

    struct Fixture {
        decls: DeclTable,
        iface: DeclId,
        class: DeclId,
        ctor: DeclId,
        method: DeclId,
        property: DeclId,
    }

    /// `interface Shape { fun area(scale: Int): Int }` and
    /// `class Box(val shape: Shape) : Shape by ...`
    fn fixture(extension: bool) -> Fixture {
        let mut decls = DeclTable::new();
        let iface = decls.add(DeclInfo::new(
            "Shape",
            "app",
            DeclKind::Class(ClassInfo {
                kind: ClassKind::Interface,
                superclass: None,
                interfaces: Vec::new(),
                is_inner: false,
                delegated_members: Vec::new(),
            }),
        ));
        let mut area = FunctionInfo::new(
            FunctionKind::Member,
            vec![ParamInfo::new("scale", TypeRef::Primitive(PrimitiveKind::Int))],
            TypeRef::Primitive(PrimitiveKind::Int),
        );
        area.modality = Modality::Abstract;
        area.has_extension_receiver = extension;
        let target = decls.add(DeclInfo::new("area", "app", DeclKind::Function(area.clone())).with_parent(iface));
        let class = decls.add(DeclInfo::new(
            "Box",
            "app",
            DeclKind::Class(ClassInfo {
                kind: ClassKind::Class,
                superclass: None,
                interfaces: vec![iface],
                is_inner: false,
                delegated_members: Vec::new(),
            }),
        ));
        let method = decls.add(DeclInfo::new("area", "app", DeclKind::Function(area)).with_parent(class));
        let ctor = decls.add(
            DeclInfo::new(
                "<init>",
                "app",
                DeclKind::Function(FunctionInfo::new(
                    FunctionKind::Constructor { primary: true },
                    vec![ParamInfo::new("shape", TypeRef::Class(iface))],
                    TypeRef::Unit,
                )),
            )
            .with_parent(class),
        );
        let property = decls.add(
            DeclInfo::new("shape", "app", DeclKind::Property(PropertyInfo::new(TypeRef::Class(iface), false)))
                .with_parent(class),
        );
        if let Some(DeclKind::Class(info)) = decls.get_mut(class).map(|d| &mut d.kind) {
            info.delegated_members.push(DelegatedMember {
                member: method,
                target,
                interface: iface,
            });
        }
        Fixture {
            decls,
            iface,
            class,
            ctor,
            method,
            property,
        }
    }

    /// The IR of `Box` with one pending delegation and an empty primary
    /// constructor taking `shape`
    fn box_module(fx: &Fixture, initializer: IrExpr) -> (IrModule, ClassId, FunctionId) {
        let mut module = IrModule::new("app");
        let file = module.add_file("box.kt", Vec::new());
        let class = module.classes.alloc(crate::ir::decls::IrClass {
            decl: fx.class,
            name: "Box".into(),
            kind: ClassKind::Class,
            container: Container::File(file),
            decls: Default::default(),
            is_inner: false,
            closure_fields: Vec::new(),
            delegate_fields: Vec::new(),
            delegations: vec![IrDelegation {
                interface: fx.iface,
                initializer,
                prelude: Vec::new(),
                insert_at: 0,
                location: SourceLocation::unknown(),
            }],
            location: SourceLocation::unknown(),
        });
        module.register(Container::File(file), fx.class, IrDecl::Class(class));
        let ctor = module.functions.alloc(IrFunction::new(
            fx.ctor,
            "<init>",
            FunctionKind::Constructor { primary: true },
            Container::Class(class),
            SourceLocation::unknown(),
        ));
        let shape = module.new_parameter("shape", ctor);
        module.functions[ctor].params = vec![shape];
        module.functions[ctor].body = Some(Vec::new());
        module.register(Container::Class(class), fx.ctor, IrDecl::Function(ctor));
        (module, class, ctor)
    }

    fn forwarder_body(module: &IrModule, fx: &Fixture) -> String {
        let forwarder = module.function_by_decl(fx.method).unwrap();
        let body = module.functions[forwarder].body.as_ref().unwrap();
        assert_eq!(body.len(), 1);
        SexpDumper::new(module, &fx.decls).stmt(&body[0])
    }

    #[test]
    fn test_delegate_field_and_forwarder() {
        let fx = fixture(false);
        let initializer = IrExpr::New {
            class: fx.class,
            constructor: fx.ctor,
            args: Vec::new(),
        };
        let (mut module, class, ctor) = box_module(&fx, initializer);

        assert_eq!(lower_delegations(&mut module, &fx.decls).unwrap(), 1);
        assert_eq!(module.classes[class].delegate_fields.len(), 1);
        assert!(module.classes[class].delegations.is_empty());
        assert_eq!(
            forwarder_body(&module, &fx),
            "(return Box.area (invoke virtual (field this (delegate Shape$delegate)) Shape.area (var scale)))"
        );
        let init = module.functions[ctor].body.as_ref().unwrap();
        assert_eq!(init.len(), 1);
    }

    #[test]
    fn test_val_property_parameter_is_used_as_delegate() {
        let fx = fixture(false);
        let (mut module, class, ctor) = box_module(&fx, IrExpr::Null);
        let shape = module.functions[ctor].params[0];
        module.functions[ctor].property_params = vec![(shape, fx.property)];
        module.classes[class].delegations[0].initializer = IrExpr::var(shape);

        assert_eq!(lower_delegations(&mut module, &fx.decls).unwrap(), 1);
        assert!(module.classes[class].delegate_fields.is_empty());
        assert!(module.functions[ctor].body.as_ref().unwrap().is_empty());
        assert_eq!(
            forwarder_body(&module, &fx),
            "(return Box.area (invoke virtual (field this (backing Box.shape)) Shape.area (var scale)))"
        );
    }

    #[test]
    fn test_forwarder_passes_extension_receiver_first() {
        let fx = fixture(true);
        let initializer = IrExpr::New {
            class: fx.class,
            constructor: fx.ctor,
            args: Vec::new(),
        };
        let (mut module, _, _) = box_module(&fx, initializer);

        assert_eq!(lower_delegations(&mut module, &fx.decls).unwrap(), 1);
        let forwarder = module.function_by_decl(fx.method).unwrap();
        let function = &module.functions[forwarder];
        assert!(function.extension_receiver.is_some());
        assert_eq!(function.params.len(), 1);
        assert_eq!(
            forwarder_body(&module, &fx),
            "(return Box.area (invoke virtual (field this (delegate Shape$delegate)) Shape.area (var receiver) (var scale)))"
        );
    }
}
