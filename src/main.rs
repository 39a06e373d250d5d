fn main() {
    std::process::exit(tidyai_lib::run())
}
