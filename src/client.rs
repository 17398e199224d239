use futures::stream::{BoxStream, StreamExt};
use reqwest_streams::JsonStreamResponse;

use crate::monitor::{Snapshot, StartOutcome, Update};
use crate::tasks::TaskSnapshot;


const MAX_UPDATE_LEN: usize = 64 * 1024;


#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("update stream failed: {0}")]
    Stream(String),
}


#[derive(Clone, Debug)]
pub struct Client {
    reqwest: reqwest::Client,
    server: String,
}

impl Client {
    pub fn new(server: String) -> Self {
        Self {
            reqwest: reqwest::Client::new(),
            server: server.trim_end_matches('/').to_string(),
        }
    }

    pub async fn start(&self) -> Result<StartOutcome, Error> {
        let response = self.reqwest
            .post(format!("{}/run", self.server))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    pub async fn stop(&self) -> Result<(), Error> {
        self.reqwest
            .post(format!("{}/stop", self.server))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    pub async fn status(&self) -> Result<Snapshot, Error> {
        let response = self.reqwest
            .get(format!("{}/status", self.server))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    pub async fn task(&self, code: &str) -> Result<TaskSnapshot, Error> {
        let response = self.reqwest
            .get(format!("{}/tasks/{}", self.server, code))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    pub async fn updates(&self) -> Result<BoxStream<'static, Result<Update, Error>>, Error> {
        let response = self.reqwest
            .get(format!("{}/updates", self.server))
            .send()
            .await?
            .error_for_status()?;

        Ok(response
            .json_nl_stream::<Update>(MAX_UPDATE_LEN)
            .map(|update| update.map_err(|err| Error::Stream(err.to_string())))
            .boxed())
    }
}
