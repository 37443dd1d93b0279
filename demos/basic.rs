use std::time::Duration;

use tablestore_reader::{
    query::{combine, condition},
    CachePolicy, CompareOp, DynamicEntity, LogicalOp, RetryParams, TableQuery, TableStorageReader,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads StorageConnectionString, e.g. "UseDevelopmentStorage=true".
    let reader = TableStorageReader::table("people")?
        .create_if_not_exist()
        .await?
        .with_cache_policy_and_hint(CachePolicy::sliding(Duration::from_secs(30)), "demo")?;

    let filter = combine(
        &condition("PartitionKey", CompareOp::Eq, "staff"),
        LogicalOp::And,
        &condition("Age", CompareOp::Ge, 30),
    );
    let query = TableQuery::<DynamicEntity>::new().filter(filter).take(50);

    let first = reader.execute(query.clone()).await?;
    let second = reader.execute(query).await?;
    println!("{} rows, repeated query returned {} rows", first.len(), second.len());

    for row in first {
        println!("{}/{} {:?}", row.partition_key, row.row_key, row.get_str("Name"));
    }

    let retry = RetryParams::default();
    println!(
        "callers retrying failures would use up to {} retries, {}..{} ms back-off",
        retry.max_retries(),
        retry.min_back_off_delay_ms(),
        retry.max_back_off_delay_ms()
    );

    Ok(())
}
