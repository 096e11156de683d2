//! OpenJudge HTTP 服务：认证、提交与查询接口，以及 SeaORM 持久化。

pub mod api;
pub mod auth;
pub mod db;
pub mod entity;
pub mod repository;
pub mod settings;
