pub mod logger;
pub mod naming;
pub mod validator;
