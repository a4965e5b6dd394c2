//! Harness that runs registered checks through the scheduler against fakes.

use posture_core::{NormalizedFinding, Provider};
use posture_engine::{
    CheckRegistry, CheckRegistryBuilder, Credential, MemorySink, ProviderTarget, Result, RunConfig,
    RunResult, Scheduler, StaticResolver,
};
use std::sync::Arc;

pub type Register = fn(&mut CheckRegistryBuilder) -> Result<()>;

pub async fn run_scope(
    provider: Provider,
    account: &str,
    region: &str,
    credential: Credential,
    register: Register,
) -> (RunResult, Vec<NormalizedFinding>) {
    let mut builder = CheckRegistry::builder();
    register(&mut builder).unwrap();

    let sink = Arc::new(MemorySink::new());
    let scheduler = Scheduler::builder(builder.build())
        .resolver(StaticResolver::new().credential(credential))
        .sink_arc(sink.clone())
        .build()
        .unwrap();

    let config = RunConfig::new()
        .target(ProviderTarget::new(provider).account(account).region(region));
    let result = scheduler.run(&config).await.unwrap();
    (result, sink.take())
}

#[cfg(feature = "aws")]
pub async fn run_aws<A: crate::aws::AwsApi + 'static>(
    api: Arc<A>,
    register: Register,
) -> (RunResult, Vec<NormalizedFinding>) {
    let client: crate::aws::AwsClient = api;
    run_scope(Provider::Aws, "111122223333", "us-east-1", Credential::new(client), register).await
}

#[cfg(feature = "azure")]
pub async fn run_azure<A: crate::azure::AzureApi + 'static>(
    api: Arc<A>,
    register: Register,
) -> (RunResult, Vec<NormalizedFinding>) {
    let client: crate::azure::AzureClient = api;
    run_scope(Provider::Azure, "sub-1", "eastus", Credential::new(client), register).await
}
