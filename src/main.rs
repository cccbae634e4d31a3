fn main() -> Result<(), Box<dyn std::error::Error>> {
    couchbase_explorer::run()
}
