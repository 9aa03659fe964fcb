//! Contract tests for lua_bridge
