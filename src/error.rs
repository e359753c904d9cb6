use quick_error::quick_error;

quick_error! {
    #[derive(Debug)]
    pub enum DataQuestionError {
        Validation(msg: String) {
            display("Validation failure: {}", msg)
        }
        MalformedInput(msg: String) {
            display("Malformed input: {}", msg)
        }
        Auth(msg: String) {
            display("Authentication failure: {}", msg)
        }
        Upstream(msg: String) {
            display("Upstream failure: {}", msg)
        }
        Io(err: std::io::Error) {
            display("IO failure: {:?}", err)
            from()
        }
        Serde(err: serde_json::Error) {
            display("Serialization failure: {:?}", err)
            from()
        }
    }
}

impl From<reqwest::Error> for DataQuestionError {
    fn from(err: reqwest::Error) -> Self {
        DataQuestionError::Upstream(err.to_string())
    }
}
