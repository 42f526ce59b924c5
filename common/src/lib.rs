pub mod args;
pub mod shutdown;

/// Writes the readiness file consumed by the pod's readiness probe.
pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Process-wide setup that must run before anything else: color support
/// detection and the `rustls` crypto provider shared by the kube client and
/// the Cruise Control `reqwest` client.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
    install_rustls_provider();
}

/// Installs the process-wide default `rustls` crypto provider. Both `kube`
/// and `reqwest` are built against `rustls` and will panic on their first
/// TLS handshake if no provider has been installed.
pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");
}
