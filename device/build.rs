fn main() {
    // The ESP-IDF build-system glue is only needed when building the
    // firmware for an esp32 target. On the host build (default feature set)
    // the `embuild::espidf` module is irrelevant, so skip it.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
