//! Wire names for services.

use super::descriptor::InterfaceDescriptor;

/// The service name an interface is exposed under.
///
/// `namespace.` (when set), then the explicit service name or the interface
/// name with its leading `I` stripped, then `-Arg` per generic argument.
pub fn service_name(interface: &InterfaceDescriptor) -> String {
    let mut name = String::new();
    if let Some(namespace) = interface.get_namespace().filter(|ns| !ns.is_empty()) {
        name.push_str(namespace);
        name.push('.');
    }
    match interface.get_service_name() {
        Some(explicit) => name.push_str(explicit),
        None => name.push_str(strip_interface_prefix(interface.name())),
    }
    for arg in interface.generic_args() {
        name.push('-');
        name.push_str(&flatten_type_name(&arg.short_name()));
    }
    name
}

/// `ICalculator` becomes `Calculator`; `Item` and `I` stay as they are.
fn strip_interface_prefix(name: &str) -> &str {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some('I'), Some(next)) if next.is_uppercase() => &name[1..],
        _ => name,
    }
}

/// `Option<String>` becomes `Option-String`, `Option<(String, i32)>` becomes `Option-String-i32`.
fn flatten_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
