fn main() -> anyhow::Result<()> {
    confluence_rag_indexer::run()
}
