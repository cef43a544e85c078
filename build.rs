fn main() {
    // Device builds need the ESP-IDF linker args; hosted builds need nothing
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
