/// Commands sent from publishers down to the connection task.
#[derive(Debug, Clone)]
pub enum TransportCommand {
    /// STOMP SEND of an already-serialized JSON body.
    Publish {
        destination: &'static str,
        body: String,
    },
}
