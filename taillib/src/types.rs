pub type JobId = u64;
pub type RunId = u64;
pub type JobName = String;
pub type Conclusion = String;
pub type Port = u16;
pub type Lines = Vec<String>;
