fn main() -> anyhow::Result<()> {
    stickplan_lib::run()
}
