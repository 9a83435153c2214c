fn main() -> anyhow::Result<()> {
    posewatch_lib::run()
}
