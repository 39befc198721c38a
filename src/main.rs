fn main() -> Result<(), Box<dyn std::error::Error>> {
    signup_autofill::cli::run()
}
