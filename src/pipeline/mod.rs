pub mod storage;
pub mod rag;
pub mod reasoning;
pub mod severity;
pub mod safety;
pub mod validator;
