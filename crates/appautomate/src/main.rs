fn main() -> anyhow::Result<()> {
    appautomate::run()
}
