//! Hosting orchestrator: turns contract and service modules into running
//! listeners.
//!
//! Construction follows four steps:
//! 1. Register the module folder with a [`ModuleResolver`] and connect it
//!    to the domain.
//! 2. Load every contract module metadata-only and collect its endpoint
//!    configuration into an [`EndpointCatalog`].
//! 3. Fully load every service module, resolving references through the
//!    domain (and therefore the resolver).
//! 4. Bind each locally hosted endpoint to the single implementation of
//!    its contract, creating at most one listener per implementation.
//!
//! Per-endpoint problems are logged and skipped. Only shared setup
//! failures propagate out of the constructors.

pub mod matching;
pub mod observer;
pub mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use svchost_core::{EndpointCatalog, EndpointDescriptor, QualifiedTypeName, MODULE_EXTENSION};
use tracing::{debug, info, warn};

pub use matching::{Candidate, ImplementationIndex};
pub use observer::DiagnosticObserver;
pub use registry::HostRegistry;

use crate::binding::{resolve_binding, Binding};
use crate::domain::{LoadMode, LoadedModule, ModuleDomain};
use crate::error::HostingError;
use crate::host::{
    CompositeListenerObserver, Listener, ListenerFactory, ListenerObserver,
    NetworkListenerFactory, METADATA_CONTRACT, METADATA_SUFFIX,
};
use crate::resolver::{executable_dir, ModuleResolver};

/// File pattern selecting contract modules in a folder.
pub const CONTRACTS_PATTERN: &str = "*.contracts.*";

/// File pattern selecting service modules in a folder.
pub const SERVICES_PATTERN: &str = "*.services.*";

/// Shared collaborators of an orchestrator.
pub struct HostingOptions {
    /// Domain modules are loaded into. Defaults to the process domain.
    pub domain: Arc<ModuleDomain>,
    /// Creates one listener per hosted implementation.
    pub listener_factory: Arc<dyn ListenerFactory>,
    /// Observers wired into every listener, after the diagnostic observer.
    pub observers: Vec<Arc<dyn ListenerObserver>>,
    /// Fallback folder of the module resolver. Defaults to the directory
    /// of the running executable.
    pub resolver_home: Option<PathBuf>,
}

impl Default for HostingOptions {
    fn default() -> Self {
        Self {
            domain: ModuleDomain::current(),
            listener_factory: Arc::new(NetworkListenerFactory::default()),
            observers: Vec::new(),
            resolver_home: None,
        }
    }
}

/// What happened to one endpoint descriptor during binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// `http` address; hosted by an external web server.
    External,
    /// The contract type could not be resolved or is not an interface.
    ContractUnresolved,
    /// No concrete class implements the contract.
    NoImplementation,
    /// More than one concrete class implements the contract.
    Ambiguous(usize),
    /// No binding type with that name is registered.
    BindingUnresolved,
    /// The binding type failed to instantiate.
    BindingFailed,
    /// The listener rejected the endpoint.
    AttachFailed,
    /// The endpoint was attached to a listener.
    Bound,
}

impl fmt::Display for BindOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => f.write_str("external"),
            Self::ContractUnresolved => f.write_str("contract unresolved"),
            Self::NoImplementation => f.write_str("no implementation"),
            Self::Ambiguous(count) => write!(f, "ambiguous ({count} implementations)"),
            Self::BindingUnresolved => f.write_str("binding unresolved"),
            Self::BindingFailed => f.write_str("binding failed"),
            Self::AttachFailed => f.write_str("attach failed"),
            Self::Bound => f.write_str("bound"),
        }
    }
}

/// Discovers, binds, and runs hosted services.
pub struct HostingOrchestrator {
    domain: Arc<ModuleDomain>,
    resolver: Arc<ModuleResolver>,
    listener_factory: Arc<dyn ListenerFactory>,
    observer: Arc<dyn ListenerObserver>,
    endpoints: EndpointCatalog,
    services: Vec<Arc<LoadedModule>>,
    hosts: HostRegistry,
    outcomes: Vec<(EndpointDescriptor, BindOutcome)>,
}

impl HostingOrchestrator {
    /// Hosts every `*.contracts.*` and `*.services.*` module in `folder`.
    ///
    /// # Errors
    ///
    /// Returns [`HostingError`] if the folder cannot be enumerated, a
    /// module cannot be loaded, or an endpoint configuration is malformed.
    pub fn from_folder(folder: impl AsRef<Path>, options: HostingOptions) -> Result<Self, HostingError> {
        let folder = folder.as_ref();
        let contracts = enumerate(folder, CONTRACTS_PATTERN)?;
        log_candidates("Contract", &contracts);
        let services = enumerate(folder, SERVICES_PATTERN)?;
        log_candidates("Service", &services);
        Self::construct(folder, &contracts, &services, options)
    }

    /// Hosts one contract module with the `*.services.*` modules next to it.
    ///
    /// A bare file name is read from the current directory when it exists
    /// there and from the executable's directory otherwise. The services
    /// are taken from the same folder the contract is read from.
    ///
    /// # Errors
    ///
    /// See [`HostingOrchestrator::from_folder`].
    pub fn from_contract(contract: impl AsRef<Path>, options: HostingOptions) -> Result<Self, HostingError> {
        let (folder, contract) = locate_contract(contract.as_ref());
        log_candidates("Contract", std::slice::from_ref(&contract));
        let services = enumerate(&folder, SERVICES_PATTERN)?;
        log_candidates("Service", &services);
        Self::construct(&folder, &[contract], &services, options)
    }

    /// Hosts one contract module with an explicit list of service modules.
    ///
    /// Only the contract's folder is registered for resolution.
    ///
    /// # Errors
    ///
    /// See [`HostingOrchestrator::from_folder`].
    pub fn from_contract_and_services(
        contract: impl AsRef<Path>,
        services: &[PathBuf],
        options: HostingOptions,
    ) -> Result<Self, HostingError> {
        let (folder, contract) = locate_contract(contract.as_ref());
        log_candidates("Contract", std::slice::from_ref(&contract));
        log_candidates("Service", services);
        Self::construct(&folder, &[contract], services, options)
    }

    fn construct(
        folder: &Path,
        contracts: &[PathBuf],
        services: &[PathBuf],
        options: HostingOptions,
    ) -> Result<Self, HostingError> {
        let HostingOptions {
            domain,
            listener_factory,
            observers,
            resolver_home,
        } = options;

        let resolver = Arc::new(match resolver_home {
            Some(home) => ModuleResolver::with_home(Some(home)),
            None => ModuleResolver::new(),
        });
        resolver.add_folder(folder);
        resolver.connect(Some(&domain));

        let mut observer = CompositeListenerObserver::new(vec![Arc::new(DiagnosticObserver)]);
        for extra in observers {
            observer.add(extra);
        }

        let mut orchestrator = Self {
            domain,
            resolver,
            listener_factory,
            observer: Arc::new(observer),
            endpoints: EndpointCatalog::new(),
            services: Vec::new(),
            hosts: HostRegistry::new(),
            outcomes: Vec::new(),
        };
        orchestrator.load_endpoints(contracts)?;
        orchestrator.construct_hosts(services)?;
        Ok(orchestrator)
    }

    fn load_endpoints(&mut self, contracts: &[PathBuf]) -> Result<(), HostingError> {
        for path in contracts {
            let module = self.domain.load_from(path, LoadMode::MetadataOnly)?;
            if !self.endpoints.try_load(module.manifest())? {
                debug!("{} declares no endpoints", module.name());
            }
        }
        info!("Loaded {} endpoint(s)", self.endpoints.len());
        Ok(())
    }

    fn construct_hosts(&mut self, services: &[PathBuf]) -> Result<(), HostingError> {
        for path in services {
            let module = self.domain.load_from(path, LoadMode::Full)?;
            self.services.push(module);
        }

        let index = ImplementationIndex::build(&self.services, &self.domain);
        let descriptors: Vec<EndpointDescriptor> = self.endpoints.iter().cloned().collect();
        for descriptor in descriptors {
            let outcome = self.bind_endpoint(&descriptor, &index);
            debug!("Endpoint {}: {outcome}", descriptor.name());
            self.outcomes.push((descriptor, outcome));
        }
        Ok(())
    }

    fn bind_endpoint(&mut self, descriptor: &EndpointDescriptor, index: &ImplementationIndex) -> BindOutcome {
        if descriptor.is_externally_hosted() {
            debug!(
                "Endpoint {} at {} is hosted externally",
                descriptor.name(),
                descriptor.address()
            );
            return BindOutcome::External;
        }

        let contract = match self.domain.resolve_contract(descriptor.contract()) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Unable to host endpoint {}: {e}", descriptor.name());
                return BindOutcome::ContractUnresolved;
            }
        };
        let contract_name = contract.descriptor.name.as_str();

        // Classes whose service module never loaded the declaration are
        // indexed under the bare name.
        let candidates = match index.candidates(&contract.qualified_name()) {
            [] => index.candidates(&QualifiedTypeName::new(contract_name, None)),
            found => found,
        };
        let implementation = match candidates {
            [] => {
                info!(
                    "No implementation of {contract_name} found for endpoint {}",
                    descriptor.name()
                );
                return BindOutcome::NoImplementation;
            }
            [candidate] => candidate.implementation(),
            candidates => {
                warn!(
                    "Found {} implementations of {contract_name} for endpoint {}; expected exactly one",
                    candidates.len(),
                    descriptor.name()
                );
                return BindOutcome::Ambiguous(candidates.len());
            }
        };

        let factory = Arc::clone(&self.listener_factory);
        let observer = Arc::clone(&self.observer);
        let listener = self
            .hosts
            .get_or_create(implementation, |implementation| {
                debug!("Creating host for {}", implementation.key());
                factory.create(implementation, observer)
            });

        let Some(registration) = resolve_binding(descriptor.binding()) else {
            warn!(
                "Unable to host endpoint {}: unknown binding {}",
                descriptor.name(),
                descriptor.binding()
            );
            return BindOutcome::BindingUnresolved;
        };
        let binding = match registration.instantiate() {
            Ok(binding) => binding,
            Err(e) => {
                warn!(
                    "Unable to create binding {} for endpoint {}: {e:#}",
                    descriptor.binding(),
                    descriptor.name()
                );
                return BindOutcome::BindingFailed;
            }
        };

        let address = descriptor.resolved_address();
        if let Err(e) = listener.add_service_endpoint(contract_name, binding, &address) {
            warn!("Unable to add endpoint {}: {e}", descriptor.name());
            return BindOutcome::AttachFailed;
        }
        attach_metadata(&mut **listener, &address);

        info!(
            "Bound endpoint {} at {address} to {}",
            descriptor.name(),
            listener.implementation().key()
        );
        BindOutcome::Bound
    }

    /// Opens every listener. A listener that fails to open is logged and
    /// does not affect the others.
    pub async fn start(&mut self) {
        let opened = self.hosts.open_all().await;
        info!("Started {opened} of {} host(s)", self.hosts.len());
    }

    /// Closes every listener, aborting those that fail to close. Never fails.
    pub async fn stop(&mut self) {
        self.hosts.close_all().await;
        info!("Stopped {} host(s)", self.hosts.len());
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointCatalog {
        &self.endpoints
    }

    #[must_use]
    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Every descriptor of the catalog with what binding did with it.
    #[must_use]
    pub fn binding_outcomes(&self) -> &[(EndpointDescriptor, BindOutcome)] {
        &self.outcomes
    }

    #[must_use]
    pub fn service_modules(&self) -> &[Arc<LoadedModule>] {
        &self.services
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn domain(&self) -> &Arc<ModuleDomain> {
        &self.domain
    }
}

impl Drop for HostingOrchestrator {
    fn drop(&mut self) {
        self.resolver.disconnect(Some(&self.domain));
    }
}

/// Adds the metadata behavior and a metadata endpoint at `<address>/mex`.
fn attach_metadata(listener: &mut dyn Listener, address: &str) {
    if listener.add_metadata_behavior() {
        debug!("Publishing metadata for {}", listener.implementation().key());
    }

    let mex = format!("{}{METADATA_SUFFIX}", address.trim_end_matches('/'));
    if listener
        .endpoints()
        .iter()
        .any(|endpoint| endpoint.is_metadata() && endpoint.address == mex)
    {
        return;
    }
    if let Err(e) = listener.add_service_endpoint(METADATA_CONTRACT, Binding::metadata_for(&mex), &mex) {
        warn!("Unable to add metadata endpoint {mex}: {e}");
    }
}

/// Module images in `folder` whose file name matches `pattern`, ignoring
/// case, sorted by path.
fn enumerate(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, HostingError> {
    let pattern = Pattern::new(pattern)?;
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    let enumerate_error = |source| HostingError::Enumerate {
        folder: folder.to_path_buf(),
        source,
    };

    let mut matches = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(enumerate_error)? {
        let path = entry.map_err(enumerate_error)?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !path.is_file() || !pattern.matches_with(name, options) {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(MODULE_EXTENSION) {
            debug!("Ignoring {}: not a module image", path.display());
            continue;
        }
        matches.push(path);
    }
    matches.sort();
    Ok(matches)
}

/// The folder holding a contract module and the path it is read from.
///
/// A path with a directory component is used as given. A bare file name
/// resolves against the current directory when the file exists there, and
/// against the executable's directory otherwise.
fn locate_contract(contract: &Path) -> (PathBuf, PathBuf) {
    if let Some(parent) = contract.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        return (parent.to_path_buf(), contract.to_path_buf());
    }
    let folder = if contract.is_file() {
        std::env::current_dir().ok()
    } else {
        executable_dir()
    }
    .unwrap_or_else(|| PathBuf::from("."));
    let located = folder.join(contract);
    (folder, located)
}

fn log_candidates(kind: &str, candidates: &[PathBuf]) {
    for candidate in candidates {
        info!("{kind} candidate: {}", candidate.display());
    }
}

impl fmt::Debug for HostingOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostingOrchestrator")
            .field("domain", &self.domain.name())
            .field("endpoints", &self.endpoints.len())
            .field("services", &self.services.len())
            .field("hosts", &self.hosts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::binding::Transport;
    use crate::host::{HostConfig, ListenerState};
    use crate::testing::{
        write_module, Failures, ModuleImage, RecordingListenerFactory, RecordingObserver,
    };

    const CONTRACT: &str = "Acme.Contracts.IFoo";
    const IMPLEMENTATION: &str = "Tests.Services.Calculator, Acme.Services";

    type Row<'a> = (&'a str, &'a str, &'a str, &'a str);

    fn contracts(rows: &[Row<'_>]) -> ModuleImage {
        ModuleImage::new("Acme.Contracts")
            .interface(CONTRACT)
            .interface("Acme.Contracts.IBar")
            .endpoints(rows)
    }

    fn services() -> ModuleImage {
        ModuleImage::new("Acme.Services")
            .reference("Acme.Contracts, Version=1.0")
            .class("Tests.Services.Calculator", &[CONTRACT])
    }

    struct Fixture {
        dir: TempDir,
        domain: Arc<ModuleDomain>,
        factory: Arc<RecordingListenerFactory>,
        observer: Arc<RecordingObserver>,
    }

    impl Fixture {
        fn new(images: &[ModuleImage]) -> Self {
            Self::with_factory(images, RecordingListenerFactory::default())
        }

        fn with_factory(images: &[ModuleImage], factory: RecordingListenerFactory) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for image in images {
                write_module(dir.path(), image);
            }
            Self {
                dir,
                domain: Arc::new(ModuleDomain::new("test")),
                factory: Arc::new(factory),
                observer: Arc::new(RecordingObserver::default()),
            }
        }

        fn options(&self) -> HostingOptions {
            HostingOptions {
                domain: Arc::clone(&self.domain),
                listener_factory: self.factory.clone(),
                observers: vec![Arc::clone(&self.observer) as Arc<dyn ListenerObserver>],
                resolver_home: Some(self.dir.path().join("home")),
            }
        }

        fn path(&self, file: &str) -> PathBuf {
            self.dir.path().join(file)
        }

        fn from_folder(&self) -> HostingOrchestrator {
            HostingOrchestrator::from_folder(self.dir.path(), self.options()).unwrap()
        }
    }

    fn outcomes(orchestrator: &HostingOrchestrator) -> Vec<BindOutcome> {
        orchestrator
            .binding_outcomes()
            .iter()
            .map(|(_, outcome)| *outcome)
            .collect()
    }

    fn addresses(listener: &dyn Listener) -> Vec<&str> {
        listener.endpoints().iter().map(|e| e.address.as_str()).collect()
    }

    #[test]
    fn http_endpoints_are_left_to_external_hosting() {
        let fixture = Fixture::new(&[
            contracts(&[
                ("Web", "http://{host}/Foo", "HttpBinding", CONTRACT),
                ("Secure", "https://{host}/Foo", "HttpsBinding", CONTRACT),
                ("Tcp", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
            ]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(orchestrator.endpoints().len(), 3);
        assert_eq!(
            outcomes(&orchestrator),
            vec![BindOutcome::External, BindOutcome::External, BindOutcome::Bound]
        );
        assert_eq!(orchestrator.host_count(), 1);
        let listener = orchestrator.hosts().get(IMPLEMENTATION).unwrap();
        assert_eq!(
            addresses(listener),
            vec!["net.tcp://localhost:9000/Foo", "net.tcp://localhost:9000/Foo/mex"]
        );
    }

    #[test]
    fn two_bindings_of_one_implementation_share_a_listener() {
        let fixture = Fixture::new(&[
            contracts(&[
                ("Tcp", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
                ("Pipe", "net.pipe://{host}/Foo{Deployment}", "PipeBinding", CONTRACT),
            ]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(fixture.factory.created(), vec![IMPLEMENTATION]);
        let listener = orchestrator.hosts().get(IMPLEMENTATION).unwrap();
        let endpoints = listener.endpoints();
        assert_eq!(endpoints.len(), 4);

        assert_eq!(endpoints[0].contract, CONTRACT);
        assert_eq!(endpoints[0].binding.transport(), Transport::Tcp);
        assert_eq!(endpoints[1].contract, METADATA_CONTRACT);
        assert_eq!(endpoints[1].binding.transport(), Transport::Tcp);
        assert!(endpoints[1].is_metadata());

        assert_eq!(endpoints[2].address, "net.pipe://localhost/Foo");
        assert_eq!(endpoints[2].binding.transport(), Transport::NamedPipe);
        assert_eq!(endpoints[3].address, "net.pipe://localhost/Foo/mex");
        assert_eq!(endpoints[3].binding.name(), "MexNamedPipeBinding");
    }

    #[test]
    fn repeated_address_gets_one_metadata_endpoint() {
        let fixture = Fixture::new(&[
            contracts(&[
                ("First", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
                ("Again", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
            ]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::Bound, BindOutcome::Bound]);
        let listener = orchestrator.hosts().get(IMPLEMENTATION).unwrap();
        let metadata = listener.endpoints().iter().filter(|e| e.is_metadata()).count();
        assert_eq!(listener.endpoints().len(), 3);
        assert_eq!(metadata, 1);
    }

    #[test]
    fn ambiguous_contract_creates_nothing() {
        let fixture = Fixture::new(&[
            contracts(&[("Tcp", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT)]),
            services().class("Acme.Services.OtherFoo", &[CONTRACT]),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::Ambiguous(2)]);
        assert_eq!(orchestrator.host_count(), 0);
        assert!(fixture.factory.created().is_empty());
    }

    #[test]
    fn ambiguous_contract_leaves_existing_listeners_alone() {
        const OTHER: &str = "Acme.Services.Bar, Acme.Services";
        let fixture = Fixture::new(&[
            contracts(&[
                ("Bar", "net.tcp://{host}:9000/Bar", "TcpBinding", "Acme.Contracts.IBar"),
                ("Foo", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
            ]),
            services()
                .class("Acme.Services.Bar", &["Acme.Contracts.IBar"])
                .class("Acme.Services.OtherFoo", &[CONTRACT]),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(
            outcomes(&orchestrator),
            vec![BindOutcome::Bound, BindOutcome::Ambiguous(2)]
        );
        assert_eq!(fixture.factory.created(), vec![OTHER]);
        let listener = orchestrator.hosts().get(OTHER).unwrap();
        assert_eq!(
            addresses(listener),
            vec!["net.tcp://localhost:9000/Bar", "net.tcp://localhost:9000/Bar/mex"]
        );
        assert_eq!(listener.state(), ListenerState::Created);
    }

    #[test]
    fn equally_named_contracts_of_other_modules_do_not_compete() {
        let fixture = Fixture::new(&[
            contracts(&[(
                "Foo",
                "net.tcp://{host}:9000/Foo",
                "TcpBinding",
                "Acme.Contracts.IFoo, Acme.Contracts",
            )]),
            ModuleImage::new("Other.Contracts").interface(CONTRACT),
            services(),
            ModuleImage::new("Other.Services")
                .reference("Other.Contracts")
                .class("Other.Services.Foo", &["Acme.Contracts.IFoo, Other.Contracts"]),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::Bound]);
        assert_eq!(fixture.factory.created(), vec![IMPLEMENTATION]);
    }

    #[test]
    fn contract_without_implementation_creates_nothing() {
        let fixture = Fixture::new(&[
            contracts(&[("Bar", "net.tcp://{host}:9000/Bar", "TcpBinding", "Acme.Contracts.IBar")]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::NoImplementation]);
        assert_eq!(orchestrator.host_count(), 0);
    }

    #[test]
    fn unresolvable_contracts_are_skipped() {
        let fixture = Fixture::new(&[
            contracts(&[
                ("Missing", "net.tcp://{host}:9000/A", "TcpBinding", "Acme.Missing.IBar, Acme.Missing"),
                ("Unknown", "net.tcp://{host}:9000/B", "TcpBinding", "Acme.Contracts.INowhere"),
                ("Class", "net.tcp://{host}:9000/C", "TcpBinding", "Tests.Services.Calculator"),
                ("Good", "net.tcp://{host}:9000/Foo", "TcpBinding", "Acme.Contracts.IFoo, Acme.Contracts"),
            ]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(
            outcomes(&orchestrator),
            vec![
                BindOutcome::ContractUnresolved,
                BindOutcome::ContractUnresolved,
                BindOutcome::ContractUnresolved,
                BindOutcome::Bound,
            ]
        );
        assert_eq!(orchestrator.host_count(), 1);
    }

    #[test]
    fn unknown_binding_is_skipped_after_the_listener_exists() {
        let fixture = Fixture::new(&[
            contracts(&[("Tcp", "net.tcp://{host}:9000/Foo", "CarrierPigeonBinding", CONTRACT)]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::BindingUnresolved]);
        assert_eq!(orchestrator.host_count(), 1);
        assert!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().endpoints().is_empty());
    }

    #[test]
    fn module_qualified_binding_names_resolve() {
        let fixture = Fixture::new(&[
            contracts(&[(
                "Tcp",
                "net.tcp://{host}:9000/Foo",
                "System.ServiceModel.TcpBinding, System.ServiceModel",
                CONTRACT,
            )]),
            services(),
        ]);
        assert_eq!(outcomes(&fixture.from_folder()), vec![BindOutcome::Bound]);
    }

    #[test]
    fn rejected_endpoint_gets_no_metadata() {
        let fixture = Fixture::new(&[
            contracts(&[("Mismatch", "net.pipe://{host}/Foo", "TcpBinding", CONTRACT)]),
            services(),
        ]);
        let orchestrator = fixture.from_folder();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::AttachFailed]);
        assert!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().endpoints().is_empty());
    }

    #[test]
    fn service_references_resolve_through_the_contract_folder() {
        let shared = ModuleImage::new("Acme.Shared").interface("Acme.Shared.IBase");
        let fixture = Fixture::new(&[
            contracts(&[("Tcp", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT)]),
            shared,
        ]);
        let elsewhere = tempfile::tempdir().unwrap();
        let service = write_module(
            elsewhere.path(),
            &services().reference("Acme.Shared"),
        );

        let orchestrator = HostingOrchestrator::from_contract_and_services(
            fixture.path("Acme.Contracts.module"),
            &[service],
            fixture.options(),
        )
        .unwrap();

        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::Bound]);
        assert_eq!(orchestrator.resolver().folders(), vec![fixture.dir.path().to_path_buf()]);
        assert_eq!(
            fixture.domain.get("Acme.Shared").unwrap().mode(),
            LoadMode::Full
        );
    }

    #[test]
    fn from_contract_uses_sibling_service_modules() {
        let fixture = Fixture::new(&[
            contracts(&[("Tcp", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT)]),
            services(),
        ]);
        std::fs::write(fixture.path("Acme.Services.txt"), "not a module").unwrap();

        let orchestrator =
            HostingOrchestrator::from_contract(fixture.path("Acme.Contracts.module"), fixture.options())
                .unwrap();
        assert_eq!(orchestrator.service_modules().len(), 1);
        assert_eq!(outcomes(&orchestrator), vec![BindOutcome::Bound]);
    }

    #[test]
    fn contract_paths_with_a_folder_are_used_as_given() {
        let contract = Path::new("modules/Acme.Contracts.module");
        assert_eq!(
            locate_contract(contract),
            (PathBuf::from("modules"), contract.to_path_buf())
        );
    }

    #[test]
    fn bare_contract_names_read_and_search_one_folder() {
        // Tests run from the package root, which holds Cargo.toml.
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            locate_contract(Path::new("Cargo.toml")),
            (cwd.clone(), cwd.join("Cargo.toml"))
        );

        let exe_dir = executable_dir().unwrap();
        assert_eq!(
            locate_contract(Path::new("Missing.Contracts.module")),
            (exe_dir.clone(), exe_dir.join("Missing.Contracts.module"))
        );
    }

    #[test]
    fn folder_patterns_ignore_case() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), &ModuleImage::new("acme.CONTRACTS"));
        write_module(dir.path(), &ModuleImage::new("Acme.Services"));
        write_module(dir.path(), &ModuleImage::new("Acme.Other"));

        let contracts = enumerate(dir.path(), CONTRACTS_PATTERN).unwrap();
        let services = enumerate(dir.path(), SERVICES_PATTERN).unwrap();
        assert_eq!(contracts, vec![dir.path().join("acme.CONTRACTS.module")]);
        assert_eq!(services, vec![dir.path().join("Acme.Services.module")]);
    }

    #[test]
    fn setup_failures_propagate() {
        let missing = tempfile::tempdir().unwrap().path().join("nowhere");
        assert!(matches!(
            HostingOrchestrator::from_folder(&missing, HostingOptions {
                domain: Arc::new(ModuleDomain::new("test")),
                ..HostingOptions::default()
            }),
            Err(HostingError::Enumerate { .. })
        ));

        let broken_reference = Fixture::new(&[
            contracts(&[]),
            services().reference("Acme.Gone"),
        ]);
        assert!(matches!(
            HostingOrchestrator::from_folder(broken_reference.dir.path(), broken_reference.options()),
            Err(HostingError::Domain(_))
        ));
        assert_eq!(broken_reference.domain.provider_count(), 0, "resolver disconnected on failure");

        let broken_config = Fixture::new(&[
            ModuleImage::new("Acme.Contracts")
                .resource("Acme.Contracts.Endpoints.Config", r#"<Config><Endpoint Name="x" /></Config>"#),
            services(),
        ]);
        assert!(matches!(
            HostingOrchestrator::from_folder(broken_config.dir.path(), broken_config.options()),
            Err(HostingError::Catalog(_))
        ));
    }

    #[test]
    fn drop_disconnects_the_resolver() {
        let fixture = Fixture::new(&[contracts(&[]), services()]);
        let orchestrator = fixture.from_folder();
        assert_eq!(fixture.domain.provider_count(), 1);
        assert!(orchestrator.resolver().is_connected(&fixture.domain));

        drop(orchestrator);
        assert_eq!(fixture.domain.provider_count(), 0);
    }

    #[tokio::test]
    async fn start_isolates_failures_and_stop_never_fails() {
        const OTHER: &str = "Acme.Services.Bar, Acme.Services";
        let factory = RecordingListenerFactory::failing(Failures {
            open: [IMPLEMENTATION.to_string()].into(),
            abort: [OTHER.to_string()].into(),
            close: [OTHER.to_string()].into(),
        });
        let fixture = Fixture::with_factory(
            &[
                contracts(&[
                    ("Foo", "net.tcp://{host}:9000/Foo", "TcpBinding", CONTRACT),
                    ("Bar", "net.tcp://{host}:9000/Bar", "TcpBinding", "Acme.Contracts.IBar"),
                ]),
                services().class("Acme.Services.Bar", &["Acme.Contracts.IBar"]),
            ],
            factory,
        );
        let mut orchestrator = fixture.from_folder();

        orchestrator.start().await;
        assert_eq!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().state(), ListenerState::Faulted);
        assert_eq!(orchestrator.hosts().get(OTHER).unwrap().state(), ListenerState::Opened);
        assert_eq!(fixture.observer.faults().len(), 1, "extra observers are wired in");

        orchestrator.stop().await;
        assert_eq!(
            fixture.factory.events(),
            vec![
                format!("open {IMPLEMENTATION}"),
                format!("open {OTHER}"),
                format!("close {IMPLEMENTATION}"),
                format!("abort {IMPLEMENTATION}"),
                format!("close {OTHER}"),
                format!("abort {OTHER}"),
            ]
        );
        assert_eq!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().state(), ListenerState::Closed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hosts_tcp_and_pipe_endpoints_end_to_end() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let tcp_address = format!("net.tcp://127.0.0.1:{port}/Foo");
        let fixture = Fixture::new(&[
            contracts(&[
                ("Tcp", &tcp_address, "TcpBinding", CONTRACT),
                ("Pipe", "net.pipe://{host}/Foo", "PipeBinding", CONTRACT),
            ]),
            services(),
        ]);
        let pipes = tempfile::tempdir().unwrap();
        let options = HostingOptions {
            listener_factory: Arc::new(NetworkListenerFactory::new(HostConfig {
                pipe_dir: pipes.path().to_path_buf(),
                ..HostConfig::default()
            })),
            ..fixture.options()
        };

        let mut orchestrator = HostingOrchestrator::from_folder(fixture.dir.path(), options).unwrap();
        assert_eq!(orchestrator.host_count(), 1);
        orchestrator.start().await;
        assert_eq!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().state(), ListenerState::Opened);

        async fn call(stream: impl tokio::io::AsyncRead + tokio::io::AsyncWrite, line: &str) -> serde_json::Value {
            let (read, mut write) = tokio::io::split(stream);
            write.write_all(format!("{line}\n").as_bytes()).await.unwrap();
            let reply = BufReader::new(read).lines().next_line().await.unwrap().unwrap();
            serde_json::from_str(&reply).unwrap()
        }

        let tcp = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let reply = call(tcp, r#"{"to":"/Foo","action":"Add","body":{"a":19,"b":23}}"#).await;
        assert_eq!(reply["body"], 42);

        let tcp = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let reply = call(tcp, r#"{"to":"/Foo/mex","action":"Get"}"#).await;
        assert_eq!(reply["body"]["service"], IMPLEMENTATION);
        assert_eq!(reply["body"]["endpoints"].as_array().unwrap().len(), 4);

        let socket = pipes.path().join("localhost_Foo.sock");
        let pipe = tokio::net::UnixStream::connect(&socket).await.unwrap();
        let reply = call(pipe, r#"{"action":"Negate","body":{"a":5}}"#).await;
        assert_eq!(reply["body"], -5);

        orchestrator.stop().await;
        assert_eq!(orchestrator.hosts().get(IMPLEMENTATION).unwrap().state(), ListenerState::Closed);
        assert!(!socket.exists());
    }
}
