//! The three atomic Lua scripts backing `LedgerOps`. Each runs to completion
//! on the Redis server without interleaving from any other client
//! — this is the entire money-safety core's atomicity unit.

use redis::Script;
use std::sync::LazyLock;

pub static RESERVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local balance_key = KEYS[1]
local reserve_key = KEYS[2]
local amount = tonumber(ARGV[1])
local now_ms = ARGV[2]
local ttl_secs = tonumber(ARGV[3])
local tenant = ARGV[4]

if redis.call('EXISTS', reserve_key) == 1 then
  return {'ERR_ALREADY_RESERVED'}
end

local balance = tonumber(redis.call('GET', balance_key) or '0')
if balance < amount then
  return {'ERR_INSUFFICIENT', tostring(balance)}
end

local new_balance = balance - amount
redis.call('SET', balance_key, tostring(new_balance))
redis.call('HSET', reserve_key, 'tenant', tenant, 'amount', tostring(amount), 'created_at_ms', now_ms)
redis.call('EXPIRE', reserve_key, ttl_secs)

return {'OK', tostring(new_balance)}
"#,
    )
});

pub static SETTLE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local balance_key = KEYS[1]
local reserve_key = KEYS[2]
local receipt_key = KEYS[3]
local requested_charge = tonumber(ARGV[1])
local now_ms = ARGV[2]
local tenant = ARGV[3]

if redis.call('EXISTS', reserve_key) == 0 then
  return {'ERR_NO_RESERVE'}
end

local reserved = tonumber(redis.call('HGET', reserve_key, 'amount'))

local charge = requested_charge
if charge < 0 then charge = 0 end
if charge > reserved then charge = reserved end

local refund = reserved - charge
local balance = tonumber(redis.call('GET', balance_key) or '0')
local new_balance = balance + refund

redis.call('SET', balance_key, tostring(new_balance))
redis.call('DEL', reserve_key)
redis.call('HSET', receipt_key, 'tenant', tenant, 'charged_micros', tostring(charge), 'settled_at_ms', now_ms)

return {'OK', tostring(charge), tostring(refund), tostring(new_balance)}
"#,
    )
});

pub static REFUND_FULL: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local balance_key = KEYS[1]
local reserve_key = KEYS[2]

if redis.call('EXISTS', reserve_key) == 0 then
  return {'ERR_NO_RESERVE'}
end

local reserved = tonumber(redis.call('HGET', reserve_key, 'amount'))
local balance = tonumber(redis.call('GET', balance_key) or '0')
local new_balance = balance + reserved

redis.call('SET', balance_key, tostring(new_balance))
redis.call('DEL', reserve_key)

return {'OK', tostring(reserved), tostring(new_balance)}
"#,
    )
});

/// Atomic per-`(scope, tenant)` rate counter used by PlanGuard.
/// INCR-first, TTL-on-first-hit, decrement-on-reject to avoid the
/// check-then-set race.
pub static RATE_INCR: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_secs = tonumber(ARGV[2])

local count = redis.call('INCR', key)
if count == 1 then
  redis.call('EXPIRE', key, window_secs)
end

if count > limit then
  redis.call('DECR', key)
  local ttl = redis.call('TTL', key)
  if ttl < 0 then ttl = window_secs end
  return {'LIMITED', tostring(ttl)}
end

return {'OK', tostring(count)}
"#,
    )
});
