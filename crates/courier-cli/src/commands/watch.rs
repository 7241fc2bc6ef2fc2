use tokio_util::sync::CancellationToken;

use crate::commands::common::CliContext;
use crate::error::CliError;

pub async fn run_watch(context: &CliContext) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let pipeline = context.chat_pipeline(store, context.remote()?);
    let cancel = CancellationToken::new();

    println!("Watching for chat changes (Ctrl-C to stop)");
    let run = pipeline.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result.map_err(CliError::from),
        signal = tokio::signal::ctrl_c() => signal?,
    }

    cancel.cancel();
    run.await?;
    println!("Stopped");
    Ok(())
}
