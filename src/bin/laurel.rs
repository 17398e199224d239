use laurel::command::Error;


#[tokio::main]
async fn main() -> Result<(), Error> {
    laurel::command::run().await
}
