fn main() {
    // Host builds (`--no-default-features`) have nothing to export.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
