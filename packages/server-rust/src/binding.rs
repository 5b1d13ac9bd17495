//! Binding configurations and their registry.
//!
//! A binding names the transport an endpoint is served over. Binding types
//! are registered at link time with [`BindingRegistration`]; the built-in
//! ones are `TcpBinding`, `PipeBinding`, `HttpBinding`, and `HttpsBinding`.
//! Additional bindings can be submitted by any linked crate:
//!
//! ```ignore
//! inventory::submit! {
//!     BindingRegistration::new("Acme.Bindings.SlowTcp", || Ok(Binding::new("SlowTcp", Transport::Tcp)))
//! }
//! ```

use std::fmt;

use svchost_core::type_name::{simple_type_name, QualifiedTypeName};

/// Transport family of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Reliable duplex TCP (`net.tcp`).
    Tcp,
    /// Machine-local named pipe (`net.pipe`).
    NamedPipe,
    /// Plain HTTP (`http`).
    Http,
    /// HTTP over TLS (`https`).
    Https,
}

impl Transport {
    /// The address scheme served by this transport.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "net.tcp",
            Self::NamedPipe => "net.pipe",
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Default port for socket-based transports.
    #[must_use]
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::Tcp => Some(808),
            Self::NamedPipe => None,
            Self::Http => Some(80),
            Self::Https => Some(443),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// An instantiated binding configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    name: String,
    transport: Transport,
    metadata: bool,
}

impl Binding {
    #[must_use]
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            transport,
            metadata: false,
        }
    }

    /// The metadata-exchange binding for an endpoint address.
    ///
    /// The flavor follows the address scheme: `net.pipe`, `net.tcp`, and
    /// `https` get their own transport; everything else gets plain HTTP.
    #[must_use]
    pub fn metadata_for(address: &str) -> Self {
        let (name, transport) = match scheme_of(address) {
            Some("net.tcp") => ("MexTcpBinding", Transport::Tcp),
            Some("net.pipe") => ("MexNamedPipeBinding", Transport::NamedPipe),
            Some("https") => ("MexHttpsBinding", Transport::Https),
            _ => ("MexHttpBinding", Transport::Http),
        };
        Self {
            name: name.to_string(),
            transport,
            metadata: true,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns `true` for metadata-exchange bindings.
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.metadata
    }
}

/// Scheme of an address (`net.tcp://host/x` -> `net.tcp`).
#[must_use]
pub fn scheme_of(address: &str) -> Option<&str> {
    address
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

/// Creates a binding instance.
pub type BindingConstructor = fn() -> anyhow::Result<Binding>;

/// Associates a binding type name with its constructor.
#[derive(Debug)]
pub struct BindingRegistration {
    pub type_name: &'static str,
    pub create: BindingConstructor,
}

impl BindingRegistration {
    #[must_use]
    pub const fn new(type_name: &'static str, create: BindingConstructor) -> Self {
        Self { type_name, create }
    }

    /// Instantiates the binding.
    ///
    /// # Errors
    ///
    /// Returns whatever the registered constructor returns.
    pub fn instantiate(&self) -> anyhow::Result<Binding> {
        (self.create)()
    }
}

inventory::collect!(BindingRegistration);

inventory::submit! {
    BindingRegistration::new("TcpBinding", || Ok(Binding::new("TcpBinding", Transport::Tcp)))
}

inventory::submit! {
    BindingRegistration::new("PipeBinding", || Ok(Binding::new("PipeBinding", Transport::NamedPipe)))
}

inventory::submit! {
    BindingRegistration::new("HttpBinding", || Ok(Binding::new("HttpBinding", Transport::Http)))
}

inventory::submit! {
    BindingRegistration::new("HttpsBinding", || Ok(Binding::new("HttpsBinding", Transport::Https)))
}

/// Resolves a binding type name to its registration.
///
/// Any module qualifier is ignored. An exact type name match is preferred;
/// otherwise the simple names (last dotted segment) are compared, so
/// `Svchost.Bindings.TcpBinding` resolves to the built-in `TcpBinding`.
#[must_use]
pub fn resolve_binding(name: &str) -> Option<&'static BindingRegistration> {
    let name = QualifiedTypeName::parse(name);
    let registrations = || inventory::iter::<BindingRegistration>.into_iter();

    registrations()
        .find(|r| r.type_name == name.type_name())
        .or_else(|| {
            registrations()
                .find(|r| simple_type_name(r.type_name) == name.simple_type_name())
        })
}
